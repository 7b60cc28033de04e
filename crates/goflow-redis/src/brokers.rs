//! List brokers over Redis on the fixed `tasks` / `results` keys.

use crate::list_store::RedisListStore;
use goflow_core::broker::{ListBroker, ListBrokerConfig, SharedBroker};
use goflow_core::task::{Task, TaskResult};
use std::sync::Arc;

/// A list broker carrying `T` over Redis.
pub type RedisBroker<T> = ListBroker<T, RedisListStore>;

fn labelled(config: &ListBrokerConfig, label: &str) -> ListBrokerConfig {
    match config.label {
        Some(_) => config.clone(),
        None => config.clone().with_label(label),
    }
}

/// Brokers for the producer side of a distributed deployment: tasks go out,
/// results come back.
pub fn producer_brokers(
    store: Arc<RedisListStore>,
    config: ListBrokerConfig,
) -> (SharedBroker<Task>, SharedBroker<TaskResult>) {
    let tasks = RedisBroker::<Task>::submit_only(Arc::clone(&store))
        .with_config(labelled(&config, "producer-tasks"));
    let results =
        RedisBroker::<TaskResult>::dequeue_only(store).with_config(labelled(&config, "producer-results"));
    (Arc::new(tasks), Arc::new(results))
}

/// Brokers for a worker process: tasks come in, results go out.
///
/// The task broker is returned concretely so the caller can `await_shutdown` it
/// after stopping its worker pool.
pub fn worker_brokers(
    store: Arc<RedisListStore>,
    config: ListBrokerConfig,
) -> (Arc<RedisBroker<Task>>, SharedBroker<TaskResult>) {
    let tasks = RedisBroker::<Task>::dequeue_only(Arc::clone(&store))
        .with_config(labelled(&config, "worker-tasks"));
    let results =
        RedisBroker::<TaskResult>::submit_only(store).with_config(labelled(&config, "worker-results"));
    (Arc::new(tasks), Arc::new(results))
}
