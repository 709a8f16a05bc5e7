//! The durable metadata catalog of the ingestion engine.
//!
//! The catalog is the authority on which series exist (name ↔ id) and on
//! each series' rescue point: the root-block set sufficient to recover the
//! sealed portion of the series. The registry batches both and drains them
//! into the catalog during metadata sync.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod interface;
pub mod mem;

pub use interface::{Catalog, Error, Result};
pub use mem::MemCatalog;
