//! In-memory implementation of the catalog interface. Used for testing and
//! for running the engine without catalog persistence.

use std::{collections::HashMap, sync::Arc};

use data_types::{LogicAddr, SeriesId};
use parking_lot::Mutex;
use snafu::ensure;

use crate::interface::{Catalog, NameConflictSnafu, Result};

/// In-memory [`Catalog`].
#[derive(Debug, Default)]
pub struct MemCatalog {
    state: Mutex<MemState>,
}

#[derive(Debug, Default)]
struct MemState {
    names: HashMap<Arc<str>, SeriesId>,
    rescue_points: HashMap<SeriesId, Vec<LogicAddr>>,
}

impl MemCatalog {
    /// Create a new, empty catalog.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Catalog for MemCatalog {
    fn insert_new_names(&self, names: &[(Arc<str>, SeriesId)]) -> Result<()> {
        let mut state = self.state.lock();
        for (name, id) in names {
            match state.names.get(name) {
                Some(existing) => ensure!(
                    existing == id,
                    NameConflictSnafu {
                        name: name.as_ref(),
                        existing: *existing,
                    }
                ),
                None => {
                    state.names.insert(Arc::clone(name), *id);
                }
            }
        }
        Ok(())
    }

    fn upsert_rescue_points(&self, points: &HashMap<SeriesId, Vec<LogicAddr>>) -> Result<()> {
        let mut state = self.state.lock();
        for (&id, roots) in points {
            state.rescue_points.insert(id, roots.clone());
        }
        Ok(())
    }

    fn series_names(&self) -> Result<Vec<(Arc<str>, SeriesId)>> {
        let state = self.state.lock();
        Ok(state
            .names
            .iter()
            .map(|(name, &id)| (Arc::clone(name), id))
            .collect())
    }

    fn rescue_points(&self, series_id: SeriesId) -> Result<Option<Vec<LogicAddr>>> {
        let state = self.state.lock();
        Ok(state.rescue_points.get(&series_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::interface::Error;

    fn name(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn names_are_recorded_and_reinsert_is_idempotent() {
        let catalog = MemCatalog::new();
        let batch = vec![(name("cpu host=a"), SeriesId::new(1))];

        catalog.insert_new_names(&batch).unwrap();
        catalog.insert_new_names(&batch).unwrap();

        let names = catalog.series_names().unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0], (name("cpu host=a"), SeriesId::new(1)));
    }

    #[test]
    fn conflicting_id_for_known_name_is_rejected() {
        let catalog = MemCatalog::new();
        catalog
            .insert_new_names(&[(name("cpu host=a"), SeriesId::new(1))])
            .unwrap();

        let err = catalog
            .insert_new_names(&[(name("cpu host=a"), SeriesId::new(2))])
            .unwrap_err();
        assert_matches!(err, Error::NameConflict { .. });
    }

    #[test]
    fn rescue_points_are_replaced_per_series() {
        let catalog = MemCatalog::new();
        let id = SeriesId::new(3);

        let mut points = HashMap::new();
        points.insert(id, vec![LogicAddr::new(0xaa)]);
        catalog.upsert_rescue_points(&points).unwrap();

        points.insert(id, vec![LogicAddr::new(0xaa), LogicAddr::new(0xbb)]);
        catalog.upsert_rescue_points(&points).unwrap();

        assert_eq!(
            catalog.rescue_points(id).unwrap(),
            Some(vec![LogicAddr::new(0xaa), LogicAddr::new(0xbb)])
        );
        assert_eq!(catalog.rescue_points(SeriesId::new(9)).unwrap(), None);
    }
}
