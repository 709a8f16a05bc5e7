//! Per-connection ingestion sessions.
//!
//! A session keeps two caches behind one lock: the local name↔id index
//! (never invalidated — series names are immutable) and the set of extent
//! handles this session currently owns for writing. The session lock is
//! held only around cache operations and the append itself; it is always
//! released before calling into the registry, which is what lets the
//! registry take session locks during a broadcast without risking a cycle.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use data_types::{FieldValue, LogicAddr, Sample, SeriesId, SessionId};
use extent_list::AppendOutcome;
use parking_lot::Mutex;
use snafu::{OptionExt, ResultExt};
use tracing::{debug, warn};

use crate::{
    registry::{AcquireOutcome, ExtentListRef, TreeRegistry},
    series_index::SeriesIndex,
    BadPayloadSnafu, ExtentSnafu, InvalidSeriesNameSnafu, LateWriteSnafu, RegistryClosedSnafu,
    Result, SeriesNotFoundSnafu,
};

/// Reply from a session offered a broadcast sample.
#[derive(Debug)]
pub(crate) enum BroadcastReply {
    /// This session does not own the series.
    NotOwner,
    /// This session owns the series and appended the sample. When the
    /// append sealed a leaf, `roots` carries the fresh root set for the
    /// registry to record as the series' rescue point.
    Handled {
        result: extent_list::Result<AppendOutcome>,
        roots: Option<Vec<LogicAddr>>,
    },
}

/// A per-connection ingestion context.
///
/// Created by [`TreeRegistry::create_session`]; closing is dropping the last
/// reference, which releases every owned series and unregisters the session
/// from the broadcast set.
#[derive(Debug)]
pub struct IngestionSession {
    id: SessionId,
    registry: Weak<TreeRegistry>,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    names: SeriesIndex,
    /// Series this session holds the single-writer token for.
    owned: HashMap<SeriesId, ExtentListRef>,
}

impl IngestionSession {
    pub(crate) fn new(id: SessionId, registry: Weak<TreeRegistry>) -> Self {
        Self {
            id,
            registry,
            state: Mutex::new(SessionState {
                names: SeriesIndex::new(),
                owned: HashMap::new(),
            }),
        }
    }

    /// The stable identity of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Resolve a raw series name to its id, registering the series on first
    /// sight anywhere in the process.
    pub fn init_series_id(&self, raw_name: &str) -> Result<SeriesId> {
        let canonical = series_name::normalize(raw_name).context(InvalidSeriesNameSnafu)?;

        {
            let state = self.state.lock();
            if let Some(id) = state.names.find(&canonical) {
                return Ok(id);
            }
        }

        let registry = self.registry.upgrade().context(RegistryClosedSnafu)?;
        let id = registry.init_series_id(&canonical);
        self.state.lock().names.insert(Arc::from(canonical), id);
        Ok(id)
    }

    /// Copy the canonical name of `id` into `buf`.
    ///
    /// Returns the number of bytes written; `0` when the id is unknown or
    /// the registry is gone; a negative value whose magnitude is the
    /// required length when `buf` is too small, in which case `buf` is left
    /// untouched.
    pub fn get_series_name(&self, id: SeriesId, buf: &mut [u8]) -> i32 {
        let cached = {
            let state = self.state.lock();
            state.names.name_of(id).map(Arc::clone)
        };

        let name = match cached {
            Some(name) => name,
            None => {
                let Some(registry) = self.registry.upgrade() else {
                    warn!(%id, "series name lookup after registry shutdown");
                    return 0;
                };
                let Some(name) = registry.series_name(id) else {
                    return 0;
                };
                self.state.lock().names.insert(Arc::clone(&name), id);
                name
            }
        };

        copy_name(&name, buf)
    }

    /// Ingest one sample.
    ///
    /// The fast path appends straight into an owned extent list. On a miss
    /// the session tries to take the series' single-writer token; if another
    /// session holds it, the sample is handed to that session through the
    /// registry's broadcast path.
    pub fn write(&self, sample: Sample) -> Result<()> {
        let FieldValue::Float(value) = sample.value else {
            return BadPayloadSnafu {
                series_id: sample.series_id,
            }
            .fail();
        };

        let mut state = self.state.lock();
        if let Some(handle) = state.owned.get(&sample.series_id) {
            let handle = Arc::clone(handle);
            let outcome = handle
                .lock()
                .append(sample.timestamp, value)
                .context(ExtentSnafu {
                    series_id: sample.series_id,
                })?;
            drop(state);
            return self.apply_owned_outcome(outcome, &sample, &handle);
        }

        let registry = self.registry.upgrade().context(RegistryClosedSnafu)?;
        match registry.try_acquire(sample.series_id) {
            AcquireOutcome::Acquired(handle) => {
                state.owned.insert(sample.series_id, Arc::clone(&handle));
                let outcome = handle
                    .lock()
                    .append(sample.timestamp, value)
                    .context(ExtentSnafu {
                        series_id: sample.series_id,
                    })?;
                drop(state);
                self.apply_owned_outcome(outcome, &sample, &handle)
            }
            AcquireOutcome::Busy => {
                drop(state);
                match registry.broadcast_sample(&sample, self.id)? {
                    AppendOutcome::Ok | AppendOutcome::FlushNeeded => Ok(()),
                    AppendOutcome::LateWrite => LateWriteSnafu {
                        series_id: sample.series_id,
                        timestamp: sample.timestamp,
                    }
                    .fail(),
                    AppendOutcome::BadId => SeriesNotFoundSnafu {
                        series_id: sample.series_id,
                    }
                    .fail(),
                }
            }
            AcquireOutcome::NotFound => SeriesNotFoundSnafu {
                series_id: sample.series_id,
            }
            .fail(),
        }
    }

    /// Whether this session currently holds the single-writer token for
    /// `id`.
    pub fn owns_series(&self, id: SeriesId) -> bool {
        self.state.lock().owned.contains_key(&id)
    }

    /// Release the single-writer token for `id`, if held, making the series
    /// acquirable by other sessions. Returns whether anything was released.
    pub fn release_series(&self, id: SeriesId) -> bool {
        self.state.lock().owned.remove(&id).is_some()
    }

    /// Broadcast hook: append `sample` if this session owns its series.
    ///
    /// Takes only the session lock and the handle mutex; never calls back
    /// into the registry — the caller holds the registry's metadata lock.
    pub(crate) fn receive_broadcast(&self, sample: &Sample) -> BroadcastReply {
        let FieldValue::Float(value) = sample.value else {
            return BroadcastReply::NotOwner;
        };

        let state = self.state.lock();
        let Some(handle) = state.owned.get(&sample.series_id) else {
            return BroadcastReply::NotOwner;
        };

        let mut extents = handle.lock();
        let result = extents.append(sample.timestamp, value);
        let roots = match result {
            Ok(AppendOutcome::FlushNeeded) => Some(extents.get_roots()),
            _ => None,
        };
        BroadcastReply::Handled { result, roots }
    }

    fn apply_owned_outcome(
        &self,
        outcome: AppendOutcome,
        sample: &Sample,
        handle: &ExtentListRef,
    ) -> Result<()> {
        match outcome {
            AppendOutcome::Ok => Ok(()),
            AppendOutcome::FlushNeeded => {
                let roots = handle.lock().get_roots();
                let registry = self.registry.upgrade().context(RegistryClosedSnafu)?;
                registry.update_rescue_points(sample.series_id, roots);
                Ok(())
            }
            AppendOutcome::LateWrite => LateWriteSnafu {
                series_id: sample.series_id,
                timestamp: sample.timestamp,
            }
            .fail(),
            AppendOutcome::BadId => SeriesNotFoundSnafu {
                series_id: sample.series_id,
            }
            .fail(),
        }
    }
}

impl Drop for IngestionSession {
    fn drop(&mut self) {
        // Dropping `state.owned` releases every single-writer token; the
        // registry only needs to forget the broadcast registration.
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_session(self.id);
        }
        debug!(session = %self.id, "ingestion session closed");
    }
}

fn copy_name(name: &str, buf: &mut [u8]) -> i32 {
    let len = name.len();
    if buf.len() < len {
        return -(len as i32);
    }
    buf[..len].copy_from_slice(name.as_bytes());
    len as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::RegistryConfig, Error};
    use assert_matches::assert_matches;
    use block_store::InMemory;
    use catalog::MemCatalog;

    fn registry() -> Arc<TreeRegistry> {
        Arc::new(TreeRegistry::new(
            Arc::new(InMemory::new()),
            Arc::new(MemCatalog::new()),
            RegistryConfig::default(),
        ))
    }

    #[test]
    fn copy_name_respects_buffer_bounds() {
        let mut buf = [0xab_u8; 5];

        assert_eq!(copy_name("abc", &mut buf), 3);
        assert_eq!(&buf[..3], b"abc");

        let mut small = [0xab_u8; 2];
        assert_eq!(copy_name("abc", &mut small), -3);
        assert_eq!(small, [0xab, 0xab]);
    }

    #[test]
    fn non_float_payloads_are_rejected() {
        let registry = registry();
        let session = registry.create_session();
        let id = session.init_series_id("cpu host=a").unwrap();

        let sample = Sample {
            series_id: id,
            timestamp: 1,
            value: FieldValue::Integer(5),
        };
        assert_matches!(session.write(sample), Err(Error::BadPayload { .. }));
    }

    #[test]
    fn writes_to_unregistered_series_are_rejected() {
        let registry = registry();
        let session = registry.create_session();

        let sample = Sample::float(SeriesId::new(404), 1, 1.0);
        assert_matches!(session.write(sample), Err(Error::SeriesNotFound { .. }));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let registry = registry();
        let session = registry.create_session();

        assert_matches!(
            session.init_series_id("cpu"),
            Err(Error::InvalidSeriesName { .. })
        );
    }

    #[test]
    fn session_survives_registry_teardown() {
        let registry = registry();
        let session = registry.create_session();
        let id = session.init_series_id("cpu host=a").unwrap();
        drop(registry);

        assert_matches!(
            session.write(Sample::float(id, 1, 1.0)),
            Err(Error::RegistryClosed)
        );
        assert_matches!(
            session.init_series_id("cpu host=b"),
            Err(Error::RegistryClosed)
        );

        // Locally cached names keep resolving; unknown ids report as such.
        let mut buf = [0_u8; 64];
        assert_eq!(session.get_series_name(id, &mut buf), 10);
        assert_eq!(&buf[..10], b"cpu host=a");
        assert_eq!(session.get_series_name(SeriesId::new(404), &mut buf), 0);
    }
}
