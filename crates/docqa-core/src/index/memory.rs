//! In-memory [`IndexStore`] for tests and embedders that do not need
//! durability.

use std::sync::{PoisonError, RwLock};

use crate::error::{RagError, Result};

use super::IndexStore;

/// Holds the last written index bytes in memory.
#[derive(Default)]
pub struct MemoryIndexStore {
    bytes: RwLock<Option<Vec<u8>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStore for MemoryIndexStore {
    fn location(&self) -> String {
        "memory".to_string()
    }

    fn exists(&self) -> bool {
        self.bytes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn read(&self) -> Result<Vec<u8>> {
        self.bytes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| RagError::Storage("nothing has been written".to_string()))
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        *self.bytes.write().unwrap_or_else(PoisonError::into_inner) = Some(bytes.to_vec());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.bytes.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_clear() {
        let store = MemoryIndexStore::new();
        assert!(!store.exists());
        assert!(store.read().is_err());

        store.write(b"abc").unwrap();
        assert!(store.exists());
        assert_eq!(store.read().unwrap(), b"abc");

        store.write(b"xyz").unwrap();
        assert_eq!(store.read().unwrap(), b"xyz");

        store.clear().unwrap();
        assert!(!store.exists());
    }
}
