//! The orchestrator: wires a task broker, a result broker, a results store
//! and, in local mode, a worker pool into one push/get API.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::broker::{BrokerReceiver, ChannelBroker, SharedBroker};
use crate::error::GoFlowError;
use crate::handler::{Handler, HandlerRegistry};
use crate::shutdown::{CloseError, Closeable};
use crate::store::{InMemoryResultsStore, ResultsStore};
use crate::task::{Payload, Task, TaskResult};
use crate::worker::{WorkerPool, DEFAULT_NUM_WORKERS};

/// Sizing for a local-mode orchestrator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GoFlowConfig {
    /// Worker count in local mode.
    pub num_workers: usize,
    /// Capacity of the local task channel; 0 makes it a rendezvous.
    pub task_queue_buffer_size: usize,
    /// Capacity of the local result channel; 0 makes it a rendezvous.
    pub result_queue_buffer_size: usize,
}

impl Default for GoFlowConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            task_queue_buffer_size: 0,
            result_queue_buffer_size: 0,
        }
    }
}

impl GoFlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_task_queue_buffer_size(mut self, size: usize) -> Self {
        self.task_queue_buffer_size = size;
        self
    }

    pub fn with_result_queue_buffer_size(mut self, size: usize) -> Self {
        self.result_queue_buffer_size = size;
        self
    }
}

/// Where tasks are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Workers run in this process.
    Local,
    /// Workers run elsewhere; this process only produces tasks and collects results.
    Distributed,
}

/// Orchestrator lifecycle: `Built → Started → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Built,
    Started,
    Closed,
}

pub struct GoFlowBuilder {
    mode: Mode,
    config: GoFlowConfig,
    results_store: Option<Arc<dyn ResultsStore>>,
    task_broker: Option<SharedBroker<Task>>,
    result_broker: Option<SharedBroker<TaskResult>>,
    registry: Option<HandlerRegistry>,
}

impl GoFlowBuilder {
    fn new(mode: Mode) -> Self {
        Self {
            mode,
            config: GoFlowConfig::default(),
            results_store: None,
            task_broker: None,
            result_broker: None,
            registry: None,
        }
    }

    pub fn config(mut self, config: GoFlowConfig) -> Self {
        self.config = config;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.config.num_workers = n;
        self
    }

    pub fn task_queue_buffer_size(mut self, size: usize) -> Self {
        self.config.task_queue_buffer_size = size;
        self
    }

    pub fn result_queue_buffer_size(mut self, size: usize) -> Self {
        self.config.result_queue_buffer_size = size;
        self
    }

    /// Use an alternate results store instead of the in-memory one.
    pub fn results_store(mut self, store: impl ResultsStore) -> Self {
        self.results_store = Some(Arc::new(store));
        self
    }

    pub fn task_broker(mut self, broker: SharedBroker<Task>) -> Self {
        self.task_broker = Some(broker);
        self
    }

    pub fn result_broker(mut self, broker: SharedBroker<TaskResult>) -> Self {
        self.result_broker = Some(broker);
        self
    }

    /// Start from an existing registry (local mode).
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<GoFlow, GoFlowError> {
        let (task_broker, result_broker, local) = match self.mode {
            Mode::Local => {
                let task_broker = self.task_broker.unwrap_or_else(|| {
                    Arc::new(ChannelBroker::<Task>::new(
                        self.config.task_queue_buffer_size,
                    ))
                });
                let result_broker = self.result_broker.unwrap_or_else(|| {
                    Arc::new(ChannelBroker::<TaskResult>::new(
                        self.config.result_queue_buffer_size,
                    ))
                });
                let local = LocalPool {
                    pool: WorkerPool::new(self.config.num_workers),
                    registry: self.registry.unwrap_or_default(),
                };
                (task_broker, result_broker, Some(local))
            }
            Mode::Distributed => {
                if self.registry.is_some() {
                    warn!("handler registry ignored in distributed mode");
                }
                let task_broker = self.task_broker.ok_or_else(|| {
                    GoFlowError::Misconfigured("distributed mode requires a task broker".into())
                })?;
                let result_broker = self.result_broker.ok_or_else(|| {
                    GoFlowError::Misconfigured("distributed mode requires a result broker".into())
                })?;
                (task_broker, result_broker, None)
            }
        };

        Ok(GoFlow {
            mode: self.mode,
            task_broker,
            result_broker,
            results: self
                .results_store
                .unwrap_or_else(|| Arc::new(InMemoryResultsStore::new())),
            local,
            ctx: CancellationToken::new(),
            state: Mutex::new(LifecycleState::Built),
            writer: Mutex::new(None),
        })
    }
}

struct LocalPool {
    pool: WorkerPool,
    registry: HandlerRegistry,
}

/// Submits tasks, collects their results, and owns everything in between.
///
/// # Example
///
/// ```rust,no_run
/// use goflow_core::{handler_fn, GoFlow, TaskResult};
/// use serde_json::json;
///
/// # async fn run() -> Result<(), goflow_core::GoFlowError> {
/// let flow = GoFlow::local().num_workers(1).build()?;
/// flow.register_handler("echo", handler_fn(|p| async move { TaskResult::ok(p) })).await;
/// flow.start().await?;
/// let id = flow.push("echo", json!("hi")).await?;
/// // ...later
/// let result = flow.get_result(&id).await?;
/// flow.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct GoFlow {
    mode: Mode,
    task_broker: SharedBroker<Task>,
    result_broker: SharedBroker<TaskResult>,
    results: Arc<dyn ResultsStore>,
    local: Option<LocalPool>,
    ctx: CancellationToken,
    state: Mutex<LifecycleState>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl GoFlow {
    /// An orchestrator running its own worker pool over in-process channels.
    pub fn local() -> GoFlowBuilder {
        GoFlowBuilder::new(Mode::Local)
    }

    /// A producer-side orchestrator talking to remote workers through the given brokers.
    pub fn distributed(
        task_broker: SharedBroker<Task>,
        result_broker: SharedBroker<TaskResult>,
    ) -> GoFlowBuilder {
        GoFlowBuilder::new(Mode::Distributed)
            .task_broker(task_broker)
            .result_broker(result_broker)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_local(&self) -> bool {
        self.mode == Mode::Local
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    /// The local handler registry; `None` in distributed mode.
    pub fn registry(&self) -> Option<&HandlerRegistry> {
        self.local.as_ref().map(|l| &l.registry)
    }

    async fn ensure_started(&self) -> Result<(), GoFlowError> {
        match *self.state.lock().await {
            LifecycleState::Started => Ok(()),
            LifecycleState::Built => Err(GoFlowError::NotStarted),
            LifecycleState::Closed => Err(GoFlowError::Closed),
        }
    }

    /// Start the worker pool (local mode) and the result writer.
    pub async fn start(&self) -> Result<(), GoFlowError> {
        let mut state = self.state.lock().await;
        match *state {
            LifecycleState::Built => {}
            LifecycleState::Started => return Err(GoFlowError::AlreadyStarted),
            LifecycleState::Closed => return Err(GoFlowError::Closed),
        }

        if let Some(local) = &self.local {
            let tasks = self.task_broker.dequeue(&self.ctx).await?;
            local.pool.start(
                &self.ctx,
                tasks,
                Arc::clone(&self.result_broker),
                local.registry.clone(),
            );
        }

        let results = self.result_broker.dequeue(&self.ctx).await?;
        let store = Arc::clone(&self.results);
        *self.writer.lock().await = Some(tokio::spawn(write_results(results, store)));

        *state = LifecycleState::Started;
        info!(mode = ?self.mode, "goflow started");
        Ok(())
    }

    /// Submit a task and return its generated id.
    #[tracing::instrument(skip(self, payload), level = "trace")]
    pub async fn push(
        &self,
        task_type: impl Into<String> + std::fmt::Debug,
        payload: Payload,
    ) -> Result<String, GoFlowError> {
        self.ensure_started().await?;
        let task = Task::new(task_type, payload);
        let id = task.id.clone();
        self.task_broker.submit(&self.ctx, task).await?;
        trace!(task_id = %id, "task pushed");
        Ok(id)
    }

    /// Look up a result without waiting. `Ok(None)` means it has not arrived (yet).
    pub async fn get_result(&self, task_id: &str) -> Result<Option<TaskResult>, GoFlowError> {
        self.ensure_started().await?;
        Ok(self.results.get(task_id).await?)
    }

    /// Register a handler for local execution.
    ///
    /// In distributed mode handlers live in the worker process, so this only logs a warning.
    pub async fn register_handler(&self, task_type: impl Into<String>, handler: impl Handler) {
        let task_type = task_type.into();
        match &self.local {
            Some(local) => {
                debug!(task_type = %task_type, "handler registered");
                local.registry.put(task_type, handler).await;
            }
            None => {
                warn!(task_type = %task_type, "register_handler ignored in distributed mode");
            }
        }
    }

    /// Cancel everything and wait for the pool, both brokers and the result writer to stop.
    pub async fn close(&self) -> Result<(), GoFlowError> {
        let mut state = self.state.lock().await;
        match *state {
            LifecycleState::Started => {}
            LifecycleState::Built => return Err(GoFlowError::NotStarted),
            LifecycleState::Closed => return Err(GoFlowError::Closed),
        }

        self.ctx.cancel();
        if let Some(local) = &self.local {
            local.pool.await_shutdown().await;
        }
        self.task_broker.await_shutdown().await;
        self.result_broker.await_shutdown().await;
        if let Some(writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.await {
                error!(error = %e, "result writer failed");
            }
        }

        *state = LifecycleState::Closed;
        info!("goflow closed");
        Ok(())
    }
}

impl Drop for GoFlow {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

#[async_trait]
impl Closeable for GoFlow {
    fn name(&self) -> &str {
        "goflow"
    }

    async fn close(&self) -> Result<(), CloseError> {
        GoFlow::close(self).await.map_err(Into::into)
    }
}

/// Copies every result from the result queue into the store until the queue closes.
async fn write_results(results: BrokerReceiver<TaskResult>, store: Arc<dyn ResultsStore>) {
    debug!("result writer started");
    while let Some(result) = results.recv().await {
        let task_id = result.task_id.clone();
        match store.put(&task_id, result).await {
            Ok(()) => trace!(task_id = %task_id, "result stored"),
            Err(e) => error!(task_id = %task_id, error = %e, "failed to store result"),
        }
    }
    debug!("result writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GoFlowConfig::default();
        assert_eq!(config.num_workers, 5);
        assert_eq!(config.task_queue_buffer_size, 0);
        assert_eq!(config.result_queue_buffer_size, 0);
    }

    #[test]
    fn test_config_from_json_fills_defaults() {
        let config: GoFlowConfig =
            serde_json::from_value(serde_json::json!({"num_workers": 2})).unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.task_queue_buffer_size, 0);
    }

    #[test]
    fn test_distributed_requires_brokers() {
        let err = GoFlowBuilder::new(Mode::Distributed).build().err().unwrap();
        assert!(matches!(err, GoFlowError::Misconfigured(_)));
    }
}
