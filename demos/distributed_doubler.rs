//! Distributed mode over Redis: a worker pool and a producer sharing one server.
//!
//! Run with: `REDIS_URL=redis://127.0.0.1:6379/ cargo run --example distributed_doubler --features redis`
//!
//! Pass `PLUGIN_DIR=/path/to/plugins` together with `--features full` to load
//! handlers from shared objects instead of the built-in doubler.

use async_trait::async_trait;
use goflow::core::broker::{Broker, ListBrokerConfig};
use goflow::core::{
    handler_fn, CloseError, Closeable, GoFlow, HandlerRegistry, ShutdownCoordinator, StaticPlugins,
    Task, TaskResult, WorkerPool,
};
use goflow::redis::{
    producer_brokers, worker_brokers, RedisBroker, RedisClient, RedisConfig, RedisListStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn doubler() -> goflow::core::SharedHandler {
    Arc::new(handler_fn(|payload| async move {
        match payload.as_i64() {
            Some(n) => TaskResult::ok(json!(n * 2)),
            None => TaskResult::err("expected an integer"),
        }
    }))
}

async fn load_builtin(registry: &HandlerRegistry) -> Result<usize, goflow::core::PluginError> {
    StaticPlugins::new()
        .with("doubler", doubler)
        .register_into(registry)
        .await
}

#[cfg(feature = "dynamic-plugins")]
async fn load_handlers(registry: &HandlerRegistry) -> Result<usize, goflow::core::PluginError> {
    match std::env::var("PLUGIN_DIR") {
        Ok(dir) => goflow::core::load_plugins_into(std::path::Path::new(&dir), registry).await,
        Err(_) => load_builtin(registry).await,
    }
}

#[cfg(not(feature = "dynamic-plugins"))]
async fn load_handlers(registry: &HandlerRegistry) -> Result<usize, goflow::core::PluginError> {
    load_builtin(registry).await
}

/// The worker pool and its task broker, closed as one unit.
struct Workers {
    ctx: CancellationToken,
    pool: WorkerPool,
    tasks: Arc<RedisBroker<Task>>,
}

#[async_trait]
impl Closeable for Workers {
    fn name(&self) -> &str {
        "workers"
    }

    async fn close(&self) -> Result<(), CloseError> {
        self.ctx.cancel();
        self.pool.await_shutdown().await;
        self.tasks.await_shutdown().await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    goflow::init();
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
    let config = ListBrokerConfig::new().with_poll_timeout(Duration::from_millis(500));

    // Worker half.
    let registry = HandlerRegistry::new();
    let loaded = load_handlers(&registry).await?;
    tracing::info!(loaded, task_types = ?registry.task_types().await, "handlers ready");

    let worker_store = Arc::new(RedisListStore::new(
        RedisClient::new(RedisConfig::new(url.clone())).await?,
    ));
    let worker_ctx = CancellationToken::new();
    let (tasks, results) = worker_brokers(worker_store, config.clone());
    let pool = WorkerPool::default();
    pool.start(&worker_ctx, tasks.dequeue(&worker_ctx).await?, results, registry);
    let workers = Arc::new(Workers {
        ctx: worker_ctx,
        pool,
        tasks,
    });

    // Producer half.
    let producer_store = Arc::new(RedisListStore::new(
        RedisClient::new(RedisConfig::new(url)).await?,
    ));
    let (task_broker, result_broker) = producer_brokers(producer_store, config);
    let flow = Arc::new(GoFlow::distributed(task_broker, result_broker).build()?);
    flow.start().await?;

    // Producer first: it stops pushing before the workers go away.
    let coordinator = ShutdownCoordinator::new();
    coordinator.register(flow.clone() as Arc<dyn Closeable>).await;
    coordinator.register(workers as Arc<dyn Closeable>).await;

    let id = flow.push("doubler", json!(10)).await?;
    for _ in 0..100 {
        if let Some(result) = flow.get_result(&id).await? {
            tracing::info!(task_id = %id, payload = %result.payload, "doubled");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tracing::info!("press Ctrl-C to stop");
    let trigger = coordinator.wait(&CancellationToken::new()).await;
    tracing::info!(?trigger, "shut down");
    Ok(())
}
