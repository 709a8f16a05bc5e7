//! The content-addressed block store consumed by the extent layer.
//!
//! The store is append-only: a block handed to [`BlockStore::append`] is
//! immutable and addressed by the returned [`LogicAddr`] for the rest of the
//! store's lifetime.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use bytes::Bytes;
use data_types::LogicAddr;
use snafu::Snafu;

pub mod memory;

pub use memory::InMemory;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("no block at address {addr}"))]
    BlockNotFound { addr: LogicAddr },
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Append-only storage of opaque blocks.
///
/// Implementations are internally synchronised; the trait is shared freely
/// between writer threads.
pub trait BlockStore: std::fmt::Debug + Send + Sync {
    /// Persist `block` and return its address.
    fn append(&self, block: Bytes) -> Result<LogicAddr>;

    /// Fetch the block previously stored at `addr`.
    fn read(&self, addr: LogicAddr) -> Result<Bytes>;
}
