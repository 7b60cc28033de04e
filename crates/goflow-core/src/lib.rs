//! Core of the goflow task-execution framework.
//!
//! Tasks are pushed through a [`Broker`] to a [`WorkerPool`], handled by the
//! [`Handler`] registered for their type, and the resulting [`TaskResult`]s
//! flow back through a second broker into a [`ResultsStore`]. [`GoFlow`]
//! wires all of it together, either in one process (local mode) or as the
//! producer half of a deployment whose workers live elsewhere.

pub mod broker;
pub mod codec;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod orchestrator;
pub mod plugin;
pub mod shutdown;
pub mod store;
pub mod task;
pub mod worker;

pub use broker::{
    Broker, BrokerError, BrokerReceiver, BrokerState, ChannelBroker, InMemoryListStore,
    ListBroker, ListBrokerConfig, ListStore, ListStoreError, QueueDirection, SharedBroker,
};
pub use codec::{Codec, CodecError, JsonCodec};
pub use error::GoFlowError;
pub use handler::{handler_fn, FnHandler, Handler, HandlerRegistry, SharedHandler};
pub use middleware::{
    with_report_time, with_retry, with_retry_policy, with_timeout, BackoffStrategy,
    RetryPolicy, TIMED_OUT_MSG,
};
pub use orchestrator::{GoFlow, GoFlowBuilder, GoFlowConfig, LifecycleState, Mode};
pub use plugin::{discover_plugins, plugin_key, PluginError, StaticPlugins};
#[cfg(feature = "dynamic-plugins")]
pub use plugin::{load_plugins, load_plugins_into};
pub use shutdown::{CloseError, Closeable, ShutdownCoordinator, ShutdownTrigger};
pub use store::{InMemoryResultsStore, ResultsStore, StoreError};
pub use task::{Payload, QueueItem, Task, TaskResult, RESULTS_KEY, TASKS_KEY};
pub use worker::{Worker, WorkerPool, DEFAULT_NUM_WORKERS};

#[cfg(test)]
mod tests;
