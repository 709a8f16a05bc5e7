//! A double-keyed series index: canonical name ↔ id.
//!
//! One instance backs the registry's global catalog (which also allocates
//! ids and tracks the not-yet-synced batch); every session holds another as
//! its local cache. Names are immutable for the life of the process, so
//! cached entries never need invalidation.

use std::sync::Arc;

use data_types::SeriesId;
use hashbrown::HashMap;

#[derive(Debug)]
pub(crate) struct SeriesIndex {
    by_name: HashMap<Arc<str>, SeriesId>,
    by_id: HashMap<SeriesId, Arc<str>>,
    /// Ids registered since the last catalog sync. Only the registry's
    /// global index ever accumulates entries here.
    new_series: Vec<SeriesId>,
    next_id: u64,
}

impl SeriesIndex {
    pub(crate) fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            new_series: Vec::new(),
            next_id: 1,
        }
    }

    /// Register a new name, allocating the next id and remembering it for
    /// the sync batch. The name must not already be present.
    pub(crate) fn add(&mut self, name: &str) -> SeriesId {
        debug_assert!(!self.by_name.contains_key(name));

        let id = SeriesId::new(self.next_id);
        self.next_id += 1;

        let name: Arc<str> = Arc::from(name);
        self.by_name.insert(Arc::clone(&name), id);
        self.by_id.insert(id, name);
        self.new_series.push(id);
        id
    }

    /// Mirror an existing `(name, id)` pair, e.g. into a session-local cache
    /// or while recovering the global index from the catalog. Does not mark
    /// the series as new. Idempotent.
    pub(crate) fn insert(&mut self, name: Arc<str>, id: SeriesId) {
        if self.by_id.contains_key(&id) {
            return;
        }
        self.by_name.insert(Arc::clone(&name), id);
        self.by_id.insert(id, name);
        // Keep the allocator ahead of recovered ids.
        if id.get() >= self.next_id {
            self.next_id = id.get() + 1;
        }
    }

    pub(crate) fn find(&self, name: &str) -> Option<SeriesId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn name_of(&self, id: SeriesId) -> Option<&Arc<str>> {
        self.by_id.get(&id)
    }

    /// The `(name, id)` pairs registered since the last sync.
    pub(crate) fn new_names(&self) -> Vec<(Arc<str>, SeriesId)> {
        self.new_series
            .iter()
            .map(|id| {
                let name = self
                    .by_id
                    .get(id)
                    .expect("new-series id missing from index");
                (Arc::clone(name), *id)
            })
            .collect()
    }

    /// Forget the new-names batch once it has reached the catalog.
    pub(crate) fn clear_new_names(&mut self) {
        self.new_series.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_allocates_monotonic_nonzero_ids() {
        let mut index = SeriesIndex::new();

        let a = index.add("cpu host=a");
        let b = index.add("cpu host=b");
        assert_eq!(a, SeriesId::new(1));
        assert_eq!(b, SeriesId::new(2));

        assert_eq!(index.find("cpu host=a"), Some(a));
        assert_eq!(index.name_of(b).map(|n| n.as_ref()), Some("cpu host=b"));
        assert_eq!(index.find("cpu host=c"), None);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn new_names_batch_tracks_adds_until_cleared() {
        let mut index = SeriesIndex::new();
        let a = index.add("m t=1");
        assert_eq!(index.new_names(), vec![(Arc::from("m t=1"), a)]);

        index.clear_new_names();
        assert!(index.new_names().is_empty());

        let b = index.add("m t=2");
        assert_eq!(index.new_names(), vec![(Arc::from("m t=2"), b)]);
    }

    #[test]
    fn insert_mirrors_without_marking_new() {
        let mut index = SeriesIndex::new();
        index.insert(Arc::from("m t=9"), SeriesId::new(9));
        index.insert(Arc::from("m t=9"), SeriesId::new(9));

        assert_eq!(index.find("m t=9"), Some(SeriesId::new(9)));
        assert!(index.new_names().is_empty());

        // The allocator resumes past recovered ids.
        assert_eq!(index.add("m t=10"), SeriesId::new(10));
    }
}
