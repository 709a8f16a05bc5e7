//! The ingestion registry and session layer.
//!
//! This crate owns the process-wide write path of the storage engine:
//!
//! * [`TreeRegistry`] — global state: the series name catalog, the table of
//!   per-series registry entries, the rescue-point buffer drained by
//!   metadata sync, and the set of live sessions.
//! * [`IngestionSession`] — per-connection state: local name↔id caches and
//!   the set of series this session currently owns for writing.
//! * [`SyncWorker`] — the background thread that drains registered names and
//!   rescue points into the durable catalog.
//!
//! Every series has at most one writing session at a time. A session that
//! does not own a series either acquires it on first write or, when another
//! session holds it, hands the sample to that session through the
//! registry's broadcast path.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

use data_types::SeriesId;
use snafu::Snafu;

mod registry;
mod series_index;
mod session;
mod sync;

pub use registry::{AcquireOutcome, ExtentListRef, RegistryConfig, SyncWait, TreeRegistry};
pub use session::IngestionSession;
pub use sync::SyncWorker;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("invalid series name: {source}"))]
    InvalidSeriesName { source: series_name::Error },

    #[snafu(display("sample for series {series_id} does not carry a float payload"))]
    BadPayload { series_id: SeriesId },

    #[snafu(display("series {series_id} is not registered"))]
    SeriesNotFound { series_id: SeriesId },

    #[snafu(display(
        "late write to series {series_id}: timestamp {timestamp} is behind the series tail"
    ))]
    LateWrite { series_id: SeriesId, timestamp: i64 },

    #[snafu(display("the ingestion registry has been shut down"))]
    RegistryClosed,

    #[snafu(display("extent storage failure on series {series_id}: {source}"))]
    Extent {
        source: extent_list::Error,
        series_id: SeriesId,
    },

    #[snafu(display("metadata catalog failure: {source}"))]
    Metadata { source: catalog::Error },
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
