//! Key-value storage the chain is persisted into

use crate::fork::ForkError;
use alloy_primitives::B256;
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors that can happen when reading from or writing to the chain's storage
#[derive(thiserror::Error, Debug)]
pub enum DatabaseError {
    #[error("missing trie root {0}")]
    MissingRoot(B256),
    #[error("no open checkpoint to {0}")]
    NoCheckpoint(&'static str),
    #[error("failed to decode {0}: {1}")]
    Decode(&'static str, String),
    #[error("database is closed")]
    Closed,
    #[error(transparent)]
    Fork(#[from] ForkError),
}

impl From<alloy_rlp::Error> for DatabaseError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Decode("rlp", err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode("json", err.to_string())
    }
}

/// An opaque, ordered key-value store.
#[auto_impl::auto_impl(&, Box, Arc)]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    fn get(&self, key: &[u8]) -> DatabaseResult<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: Vec<u8>) -> DatabaseResult<()>;

    fn delete(&self, key: &[u8]) -> DatabaseResult<()>;

    /// Closes the store, every later access fails with [`DatabaseError::Closed`]
    fn close(&self);
}

/// In-memory [`KeyValueStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    fn ensure_open(&self) -> DatabaseResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Closed)
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> DatabaseResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> DatabaseResult<()> {
        self.ensure_open()?;
        self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> DatabaseResult<()> {
        self.ensure_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn close(&self) {
        trace!(target: "storage", "closing memory store");
        self.closed.store(true, Ordering::Release);
        self.entries.write().clear();
    }
}
