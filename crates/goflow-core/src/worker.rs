use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use crate::broker::{BrokerReceiver, SharedBroker};
use crate::handler::HandlerRegistry;
use crate::task::{Task, TaskResult};

/// Default number of workers in a pool.
pub const DEFAULT_NUM_WORKERS: usize = 5;

/// A single worker: pulls tasks, runs the matching handler, publishes the result.
///
/// Workers keep no state between tasks. Within one worker the result of a
/// task is submitted before the next task is received.
#[derive(Clone)]
pub struct Worker {
    id: usize,
    tasks: BrokerReceiver<Task>,
    results: SharedBroker<TaskResult>,
    registry: HandlerRegistry,
}

impl Worker {
    pub fn new(
        id: usize,
        tasks: BrokerReceiver<Task>,
        results: SharedBroker<TaskResult>,
        registry: HandlerRegistry,
    ) -> Self {
        Self {
            id,
            tasks,
            results,
            registry,
        }
    }

    /// Process tasks until `ctx` is cancelled or the task source closes.
    #[tracing::instrument(skip(self, ctx), fields(worker_id = self.id))]
    pub async fn run(&self, ctx: CancellationToken) {
        debug!("worker started");
        loop {
            let task = tokio::select! {
                biased;
                _ = ctx.cancelled() => break,
                next = self.tasks.recv() => match next {
                    Some(task) => task,
                    None => break,
                },
            };
            self.dispatch(&ctx, task).await;
        }
        debug!("worker exiting");
    }

    /// Run one task to completion and submit its result.
    ///
    /// Tasks whose type has no registered handler are dropped.
    #[tracing::instrument(skip(self, ctx, task), fields(task_id = %task.id, task_type = %task.task_type), level = "trace")]
    pub async fn dispatch(&self, ctx: &CancellationToken, task: Task) {
        let Some(handler) = self.registry.get(&task.task_type).await else {
            warn!(worker_id = self.id, task_id = %task.id, task_type = %task.task_type, "no handler registered; dropping task");
            return;
        };

        let result = match AssertUnwindSafe(handler.handle(task.payload))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                error!(worker_id = self.id, task_id = %task.id, panic = %msg, "handler panicked");
                TaskResult::err(format!("handler panicked: {msg}"))
            }
        }
        .for_task(&task.id);

        if result.is_failure() {
            debug!(task_id = %task.id, error = ?result.err_msg, "handler reported failure");
        }
        match self.results.submit(ctx, result).await {
            Ok(()) => trace!(task_id = %task.id, "result submitted"),
            Err(e) => error!(worker_id = self.id, task_id = %task.id, error = %e, "failed to submit result"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A fixed-size pool of workers sharing one task source and one result sink.
pub struct WorkerPool {
    num_workers: usize,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_NUM_WORKERS)
    }
}

impl WorkerPool {
    /// Create a pool that will run `num_workers` workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Spawn the workers and return immediately.
    ///
    /// Calling `start` more than once only spawns workers the first time.
    pub fn start(
        &self,
        ctx: &CancellationToken,
        tasks: BrokerReceiver<Task>,
        results: SharedBroker<TaskResult>,
        registry: HandlerRegistry,
    ) {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("worker pool already started");
            return;
        }
        for worker_id in 0..self.num_workers {
            let worker = Worker::new(
                worker_id,
                tasks.clone(),
                results.clone(),
                registry.clone(),
            );
            let ctx = ctx.clone();
            self.tracker.spawn(async move { worker.run(ctx).await });
        }
        debug!(num_workers = self.num_workers, "worker pool started");
    }

    /// Wait until every worker has exited.
    pub async fn await_shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        debug!("worker pool stopped");
    }

    /// Number of workers still running.
    pub fn active_workers(&self) -> usize {
        self.tracker.len()
    }
}
