//! Traits and data types for the metadata catalog API.

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use data_types::{LogicAddr, SeriesId};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("series name {name:?} is already mapped to id {existing}"))]
    NameConflict { name: String, existing: SeriesId },

    #[snafu(display("catalog unavailable: {reason}"))]
    Unavailable { reason: String },
}

/// Convenience result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Durable storage of series names and rescue points.
///
/// Implementations are internally synchronised. Callers may hold their own
/// locks across these calls to snapshot atomically; implementations must not
/// call back into the ingestion layer.
pub trait Catalog: Debug + Send + Sync {
    /// Record newly registered series names.
    ///
    /// Re-inserting an existing `(name, id)` pair is a no-op, so a retried
    /// sync batch is harmless; mapping a known name to a *different* id is
    /// [`Error::NameConflict`].
    fn insert_new_names(&self, names: &[(Arc<str>, SeriesId)]) -> Result<()>;

    /// Replace the stored rescue points of every series in `points`.
    fn upsert_rescue_points(&self, points: &HashMap<SeriesId, Vec<LogicAddr>>) -> Result<()>;

    /// All registered series names, for registry recovery.
    fn series_names(&self) -> Result<Vec<(Arc<str>, SeriesId)>>;

    /// The stored rescue point of one series, if any.
    fn rescue_points(&self, series_id: SeriesId) -> Result<Option<Vec<LogicAddr>>>;
}
