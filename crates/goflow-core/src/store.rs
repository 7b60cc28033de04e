//! Results store.
//!
//! This module defines the ResultsStore trait mapping task ids to results,
//! and provides an in-memory implementation used by default.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::task::TaskResult;

/// Errors that can occur in a ResultsStore implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Other error: {0}")]
    Other(String),
}

/// Mapping from task id to the last result stored for it.
///
/// Implementations must be safe under concurrent reads and writes; writes to
/// the same key are last-write-wins.
#[async_trait]
pub trait ResultsStore: Send + Sync + 'static {
    /// Store `result` under `task_id`, replacing any previous value.
    async fn put(&self, task_id: &str, result: TaskResult) -> Result<(), StoreError>;
    /// Fetch the result for `task_id`, if one has been stored.
    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>, StoreError>;
}

/// In-memory implementation of ResultsStore. Results live for the process lifetime.
#[derive(Clone, Default)]
pub struct InMemoryResultsStore {
    inner: Arc<RwLock<HashMap<String, TaskResult>>>,
}

impl InMemoryResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored results.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ResultsStore for InMemoryResultsStore {
    async fn put(&self, task_id: &str, result: TaskResult) -> Result<(), StoreError> {
        let mut map = self.inner.write().await;
        map.insert(task_id.to_string(), result);
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskResult>, StoreError> {
        let map = self.inner.read().await;
        Ok(map.get(task_id).cloned())
    }
}
