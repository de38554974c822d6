//! In-memory store

use parking_lot::RwLock;

use super::{KeyValueStore, StoreEdit, StoreMap, apply_edits, read_int, read_string};
use crate::error::StoreError;

/// Volatile [`KeyValueStore`], lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<StoreMap>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_int(&self, key: &str) -> Option<i64> {
        read_int(&self.values.read(), key)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        read_string(&self.values.read(), key)
    }

    fn apply(&self, edits: Vec<StoreEdit>) -> Result<(), StoreError> {
        apply_edits(&mut self.values.write(), edits);
        Ok(())
    }
}
