//! Durable key-value storage for channel state
//!
//! The open channel handle and the applet's SELECT response are persisted so
//! a restarted process can find, and close or reuse, a channel it left open.

mod file;
mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;

/// Stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    /// Integer value
    Int(i64),
    /// String value
    Str(String),
}

/// A single mutation, applied in order by [`KeyValueStore::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEdit {
    /// Set an integer value
    PutInt(String, i64),
    /// Set a string value
    PutString(String, String),
    /// Remove a key
    Remove(String),
}

/// String-keyed store of integers and strings
///
/// Reads never fail: a missing key, or a key holding the other kind of
/// value, reads as `None`.
pub trait KeyValueStore: fmt::Debug + Send + Sync {
    /// Read an integer
    fn get_int(&self, key: &str) -> Option<i64>;

    /// Read a string
    fn get_string(&self, key: &str) -> Option<String>;

    /// Apply a batch of edits as one write
    fn apply(&self, edits: Vec<StoreEdit>) -> Result<(), StoreError>;

    /// Set an integer value
    fn put_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.apply(vec![StoreEdit::PutInt(key.to_owned(), value)])
    }

    /// Set a string value
    fn put_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.apply(vec![StoreEdit::PutString(key.to_owned(), value.to_owned())])
    }

    /// Remove a key
    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.apply(vec![StoreEdit::Remove(key.to_owned())])
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get_int(&self, key: &str) -> Option<i64> {
        (**self).get_int(key)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        (**self).get_string(key)
    }

    fn apply(&self, edits: Vec<StoreEdit>) -> Result<(), StoreError> {
        (**self).apply(edits)
    }
}

pub(crate) type StoreMap = BTreeMap<String, StoredValue>;

pub(crate) fn apply_edits(values: &mut StoreMap, edits: Vec<StoreEdit>) {
    for edit in edits {
        match edit {
            StoreEdit::PutInt(key, value) => {
                values.insert(key, StoredValue::Int(value));
            }
            StoreEdit::PutString(key, value) => {
                values.insert(key, StoredValue::Str(value));
            }
            StoreEdit::Remove(key) => {
                values.remove(&key);
            }
        }
    }
}

pub(crate) fn read_int(values: &StoreMap, key: &str) -> Option<i64> {
    match values.get(key) {
        Some(StoredValue::Int(value)) => Some(*value),
        _ => None,
    }
}

pub(crate) fn read_string(values: &StoreMap, key: &str) -> Option<String> {
    match values.get(key) {
        Some(StoredValue::Str(value)) => Some(value.clone()),
        _ => None,
    }
}
