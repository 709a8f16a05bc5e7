//! In-memory block store, suitable for testing or for running the engine
//! without a persistence backend.

use bytes::Bytes;
use data_types::LogicAddr;
use parking_lot::RwLock;
use snafu::OptionExt;

use crate::{BlockNotFoundSnafu, BlockStore, Result};

/// In-memory [`BlockStore`].
///
/// Addresses start at 1 so that address 0 never refers to a stored block.
#[derive(Debug, Default)]
pub struct InMemory {
    blocks: RwLock<Vec<Bytes>>,
}

impl InMemory {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently stored.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Whether the store holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockStore for InMemory {
    fn append(&self, block: Bytes) -> Result<LogicAddr> {
        let mut blocks = self.blocks.write();
        blocks.push(block);
        Ok(LogicAddr::new(blocks.len() as u64))
    }

    fn read(&self, addr: LogicAddr) -> Result<Bytes> {
        let blocks = self.blocks.read();
        let idx = addr.get().checked_sub(1).context(BlockNotFoundSnafu { addr })?;
        blocks
            .get(idx as usize)
            .cloned()
            .context(BlockNotFoundSnafu { addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn append_then_read_roundtrips() {
        let store = InMemory::new();

        let a = store.append(Bytes::from_static(b"hello")).unwrap();
        let b = store.append(Bytes::from_static(b"goodbye")).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);

        assert_eq!(store.read(a).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(store.read(b).unwrap(), Bytes::from_static(b"goodbye"));
    }

    #[test]
    fn unknown_address_is_an_error() {
        let store = InMemory::new();
        store.append(Bytes::from_static(b"x")).unwrap();

        assert_matches!(
            store.read(LogicAddr::new(0)),
            Err(crate::Error::BlockNotFound { .. })
        );
        assert_matches!(
            store.read(LogicAddr::new(99)),
            Err(crate::Error::BlockNotFound { .. })
        );
    }
}
