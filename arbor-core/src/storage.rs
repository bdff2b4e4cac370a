//! Storage collaborators.
//!
//! The runtime never persists anything. Nodes that need storage receive a
//! [`Store`] (usually through a dependency key) and call it from behaviors;
//! failures come back as [`StoreError`] values for the behavior's result
//! handler to deal with.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;

use crate::error::StoreError;

/// Async key-value access to domain records.
pub trait Store<R>: Send + Sync {
    /// Fetch the record stored under `key`.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<R>, StoreError>>;

    /// Store `record` under `key`.
    fn set(&self, key: &str, record: R) -> BoxFuture<'_, Result<(), StoreError>>;
}

/// In-memory [`Store`].
#[derive(Debug)]
pub struct MemoryStore<R> {
    records: DashMap<String, R>,
    read_only: AtomicBool,
}

impl<R> MemoryStore<R> {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            read_only: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Clone + Send + Sync> Store<R> for MemoryStore<R> {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<R>, StoreError>> {
        let record = self.records.get(key).map(|entry| entry.value().clone());
        future::ready(Ok(record)).boxed()
    }

    fn set(&self, key: &str, record: R) -> BoxFuture<'_, Result<(), StoreError>> {
        let result = if self.read_only.load(Ordering::SeqCst) {
            Err(StoreError::Write {
                key: key.to_string(),
                reason: "store is read-only".to_string(),
            })
        } else {
            self.records.insert(key.to_string(), record);
            Ok(())
        };
        future::ready(result).boxed()
    }
}
