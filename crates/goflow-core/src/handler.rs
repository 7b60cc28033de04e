//! Task handlers and the registry that maps task types to them.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::task::{Payload, TaskResult};

/// User code run for every task of one type.
///
/// A handler reports failure through [`TaskResult::err_msg`] rather than by
/// panicking; workers still catch panics and turn them into failed results.
/// Handlers are shared across workers and must tolerate concurrent calls.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, payload: Payload) -> TaskResult;
}

pub type SharedHandler = Arc<dyn Handler>;

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, payload: Payload) -> TaskResult {
        (**self).handle(payload).await
    }
}

/// Adapter turning an async closure into a [`Handler`].
#[derive(Clone)]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    async fn handle(&self, payload: Payload) -> TaskResult {
        (self.f)(payload).await
    }
}

/// Build a handler from an async closure.
///
/// ```rust
/// use goflow_core::{handler_fn, TaskResult};
/// let echo = handler_fn(|payload| async move { TaskResult::ok(payload) });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
{
    FnHandler { f }
}

/// Mapping from task type to handler.
///
/// Read concurrently by every worker; written during initialisation.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<RwLock<HashMap<String, SharedHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `task_type`, replacing any existing one.
    pub async fn put(&self, task_type: impl Into<String>, handler: impl Handler) {
        self.put_shared(task_type, Arc::new(handler)).await;
    }

    pub async fn put_shared(&self, task_type: impl Into<String>, handler: SharedHandler) {
        let mut map = self.inner.write().await;
        map.insert(task_type.into(), handler);
    }

    /// Register several handlers under one write lock.
    pub async fn extend(&self, handlers: impl IntoIterator<Item = (String, SharedHandler)>) {
        let mut map = self.inner.write().await;
        map.extend(handlers);
    }

    pub async fn get(&self, task_type: &str) -> Option<SharedHandler> {
        let map = self.inner.read().await;
        map.get(task_type).cloned()
    }

    /// Registered task types, sorted.
    pub async fn task_types(&self) -> Vec<String> {
        let map = self.inner.read().await;
        let mut keys: Vec<String> = map.keys().cloned().collect();
        keys.sort();
        keys
    }
}
