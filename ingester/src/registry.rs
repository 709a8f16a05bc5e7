//! The process-wide tree registry.
//!
//! The registry owns one [`RegistryEntry`] per series — the single-writer
//! token wrapping the series' extent list — plus the global name catalog,
//! the rescue-point buffer drained by metadata sync, and the set of live
//! ingestion sessions used by the broadcast fallback.
//!
//! # Lock order
//!
//! `meta` is the outermost lock: while held it may be followed by a session
//! lock (the broadcast path) or by the entry table. A session lock may be
//! followed by the entry table and an entry mutex, but never by `meta` —
//! sessions release their own lock before calling anything that takes it.
//! Extent-handle mutexes and the stores' internal locks are leaves.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use block_store::BlockStore;
use catalog::Catalog;
use data_types::{LogicAddr, Sample, SeriesId, SessionId};
use extent_list::{AppendOutcome, ExtentList, DEFAULT_LEAF_CAPACITY};
use parking_lot::{Condvar, Mutex};
use snafu::ResultExt;
use tracing::{debug, info};

use crate::{
    series_index::SeriesIndex,
    session::{BroadcastReply, IngestionSession},
    ExtentSnafu, MetadataSnafu, Result,
};

/// A shared handle to one series' extent list.
///
/// The extent list itself is single-writer; the mutex only bridges the
/// owner's appends and the broadcast appends performed on its behalf.
pub type ExtentListRef = Arc<Mutex<ExtentList>>;

/// Tuning knobs for the registry.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Samples buffered per series before a leaf is sealed into the block
    /// store.
    pub leaf_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            leaf_capacity: DEFAULT_LEAF_CAPACITY,
        }
    }
}

/// The outcome of trying to take the single-writer token of a series.
#[derive(Debug)]
pub enum AcquireOutcome {
    /// The caller now holds the series for writing; dropping the handle
    /// releases it.
    Acquired(ExtentListRef),
    /// Another holder currently owns the series.
    Busy,
    /// The series id is not registered.
    NotFound,
}

/// Outcome of waiting for a metadata-sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncWait {
    /// Rescue points are pending; run a sync.
    Ready,
    /// Woken without pending work; wait again.
    Retry,
    /// The timeout elapsed.
    TimedOut,
}

/// The per-series single-writer token.
///
/// Availability is read off the strong count of the extent handle: the
/// entry's own reference is the only one iff no session holds the series,
/// so releasing is simply dropping the handle — no bookkeeping to unwind.
#[derive(Debug)]
struct RegistryEntry {
    /// Serialises the count-check against the handle clone.
    lock: Mutex<()>,
    extents: ExtentListRef,
}

impl RegistryEntry {
    fn new(extents: ExtentListRef) -> Self {
        Self {
            lock: Mutex::new(()),
            extents,
        }
    }

    fn is_available(&self) -> bool {
        let _guard = self.lock.lock();
        Arc::strong_count(&self.extents) == 1
    }

    /// Grant the single-writer token if nobody holds it. Never blocks on a
    /// busy entry; `None` is the expected contended answer.
    fn try_acquire(&self) -> Option<ExtentListRef> {
        let _guard = self.lock.lock();
        (Arc::strong_count(&self.extents) == 1).then(|| Arc::clone(&self.extents))
    }
}

/// Process-wide ingestion state. See the module docs for the lock order.
#[derive(Debug)]
pub struct TreeRegistry {
    block_store: Arc<dyn BlockStore>,
    metadata: Arc<dyn Catalog>,
    config: RegistryConfig,
    /// Guards the name catalog, the rescue-point buffer, and the session
    /// set.
    meta: Mutex<MetaState>,
    /// Signalled whenever a rescue point is buffered or a series is
    /// registered.
    sync_cvar: Condvar,
    /// Guards the id → entry table.
    entries: Mutex<HashMap<SeriesId, Arc<RegistryEntry>>>,
}

#[derive(Debug)]
struct MetaState {
    series: SeriesIndex,
    rescue_points: HashMap<SeriesId, Vec<LogicAddr>>,
    sessions: HashMap<SessionId, Weak<IngestionSession>>,
    next_session_id: u64,
}

impl MetaState {
    fn empty() -> Self {
        Self {
            series: SeriesIndex::new(),
            rescue_points: HashMap::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
        }
    }
}

impl TreeRegistry {
    /// Create an empty registry on top of the given stores.
    pub fn new(
        block_store: Arc<dyn BlockStore>,
        metadata: Arc<dyn Catalog>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            block_store,
            metadata,
            config,
            meta: Mutex::new(MetaState::empty()),
            sync_cvar: Condvar::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuild a registry from the metadata catalog: every registered series
    /// comes back under its original id, with its extent list recovered from
    /// the stored rescue point.
    pub fn recover(
        block_store: Arc<dyn BlockStore>,
        metadata: Arc<dyn Catalog>,
        config: RegistryConfig,
    ) -> Result<Self> {
        let names = metadata.series_names().context(MetadataSnafu)?;

        let mut state = MetaState::empty();
        let mut entries = HashMap::with_capacity(names.len());
        for (name, id) in names {
            let roots = metadata
                .rescue_points(id)
                .context(MetadataSnafu)?
                .unwrap_or_default();
            let extents =
                ExtentList::recover(id, roots, Arc::clone(&block_store), config.leaf_capacity)
                    .context(ExtentSnafu { series_id: id })?;
            entries.insert(id, Arc::new(RegistryEntry::new(Arc::new(Mutex::new(extents)))));
            state.series.insert(name, id);
        }

        info!(series = state.series.len(), "recovered tree registry");
        Ok(Self {
            block_store,
            metadata,
            config,
            meta: Mutex::new(state),
            sync_cvar: Condvar::new(),
            entries: Mutex::new(entries),
        })
    }

    /// Resolve a canonical name to its id, registering the series on first
    /// sight.
    pub(crate) fn init_series_id(&self, name: &str) -> SeriesId {
        let mut meta = self.meta.lock();
        if let Some(id) = meta.series.find(name) {
            return id;
        }

        let id = meta.series.add(name);
        let extents = ExtentList::new(
            id,
            Arc::clone(&self.block_store),
            self.config.leaf_capacity,
        );
        let entry = Arc::new(RegistryEntry::new(Arc::new(Mutex::new(extents))));
        self.entries.lock().insert(id, entry);
        // An empty rescue point marks the series for the next sync so its
        // existence reaches the catalog even before the first flush.
        meta.rescue_points.insert(id, Vec::new());
        self.sync_cvar.notify_one();
        debug!(%id, name, "registered new series");
        id
    }

    /// The canonical name of `id`, if registered.
    pub(crate) fn series_name(&self, id: SeriesId) -> Option<Arc<str>> {
        let meta = self.meta.lock();
        meta.series.name_of(id).map(Arc::clone)
    }

    /// Whether `id` is registered and currently unowned, i.e. immediately
    /// acquirable.
    pub fn is_series_available(&self, id: SeriesId) -> bool {
        let entries = self.entries.lock();
        entries.get(&id).map_or(false, |entry| entry.is_available())
    }

    /// Try to take the single-writer token for `id`.
    pub fn try_acquire(&self, id: SeriesId) -> AcquireOutcome {
        let entries = self.entries.lock();
        match entries.get(&id) {
            Some(entry) => match entry.try_acquire() {
                Some(handle) => AcquireOutcome::Acquired(handle),
                None => AcquireOutcome::Busy,
            },
            None => AcquireOutcome::NotFound,
        }
    }

    /// Replace the buffered rescue point of `id` and wake the sync waiter.
    ///
    /// Callers always pass the series' full current root set, so replacing
    /// the previous buffered value loses nothing.
    pub fn update_rescue_points(&self, id: SeriesId, roots: Vec<LogicAddr>) {
        let mut meta = self.meta.lock();
        meta.rescue_points.insert(id, roots);
        self.sync_cvar.notify_one();
    }

    /// Deliver `sample` to whichever live session owns its series.
    ///
    /// Runs under the metadata lock: the session set cannot change while the
    /// sample is in flight, and the owner's rescue point lands in the buffer
    /// in the same critical section. Callees only take their own session
    /// lock and never call back into the registry.
    pub(crate) fn broadcast_sample(
        &self,
        sample: &Sample,
        source: SessionId,
    ) -> Result<AppendOutcome> {
        // The upgraded references must outlive the guard: if one of them is
        // the last reference to a closing session, its teardown re-enters
        // the registry and must not find the metadata lock held.
        let mut alive = Vec::new();
        let mut meta = self.meta.lock();
        for (&session_id, session) in &meta.sessions {
            if session_id == source {
                continue;
            }
            if let Some(session) = session.upgrade() {
                alive.push(session);
            }
        }

        for session in &alive {
            match session.receive_broadcast(sample) {
                BroadcastReply::NotOwner => continue,
                BroadcastReply::Handled { result, roots } => {
                    if let Some(roots) = roots {
                        meta.rescue_points.insert(sample.series_id, roots);
                        self.sync_cvar.notify_one();
                    }
                    return result.context(ExtentSnafu {
                        series_id: sample.series_id,
                    });
                }
            }
        }
        Ok(AppendOutcome::BadId)
    }

    /// Block until rescue points await a sync, or until `timeout` elapses.
    pub fn wait_for_sync_request(&self, timeout: Duration) -> SyncWait {
        let mut meta = self.meta.lock();
        let result = self.sync_cvar.wait_for(&mut meta, timeout);
        if result.timed_out() {
            SyncWait::TimedOut
        } else if meta.rescue_points.is_empty() {
            SyncWait::Retry
        } else {
            SyncWait::Ready
        }
    }

    /// Drain newly registered names and buffered rescue points into the
    /// metadata catalog.
    ///
    /// The metadata lock is held across the catalog calls so each batch is
    /// an atomic snapshot. On failure the corresponding buffer stays in
    /// place and a later sync retries it; each buffer is cleared only after
    /// its own catalog call succeeds.
    pub fn sync_with_metadata_storage(&self) -> Result<()> {
        let mut meta = self.meta.lock();

        let names = meta.series.new_names();
        if !names.is_empty() {
            self.metadata
                .insert_new_names(&names)
                .context(MetadataSnafu)?;
            meta.series.clear_new_names();
        }

        if !meta.rescue_points.is_empty() {
            self.metadata
                .upsert_rescue_points(&meta.rescue_points)
                .context(MetadataSnafu)?;
            meta.rescue_points.clear();
        }
        Ok(())
    }

    /// Create a new ingestion session registered for broadcast delivery.
    ///
    /// The session is constructed inside the registry so its stable identity
    /// is in `sessions` before the caller can issue the first write; it
    /// unregisters itself when the last reference drops.
    pub fn create_session(self: &Arc<Self>) -> Arc<IngestionSession> {
        let mut meta = self.meta.lock();
        let id = SessionId::new(meta.next_session_id);
        meta.next_session_id += 1;

        let session = Arc::new(IngestionSession::new(id, Arc::downgrade(self)));
        meta.sessions.insert(id, Arc::downgrade(&session));
        debug!(session = %id, "created ingestion session");
        session
    }

    /// Drop a closed session from the broadcast set.
    pub(crate) fn remove_session(&self, id: SessionId) {
        let mut meta = self.meta.lock();
        if meta.sessions.remove(&id).is_some() {
            debug!(session = %id, "removed ingestion session");
        }
    }

    /// Wake the sync waiter without publishing work (shutdown path).
    pub(crate) fn poke_sync_waiter(&self) {
        self.sync_cvar.notify_all();
    }
}
