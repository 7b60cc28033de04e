//! # GoFlow - a distributed task-execution framework
//!
//! Producers push typed tasks onto a queue, workers run the handler
//! registered for each task type, and results flow back into a store the
//! producer can poll.
//!
//! ## Features
//!
//! - Core functionality (local mode, in-memory list store, middleware) is always included
//! - `redis`: Redis-backed list brokers for distributed mode
//! - `dynamic-plugins`: load handlers from shared objects at start-up
//! - `full`: Enables all features
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! goflow = { version = "0.4.0", features = ["redis"] }
//! ```

/// Install a `tracing` subscriber honouring `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub use goflow_core as core;

#[cfg(feature = "redis")]
pub use goflow_redis as redis;

pub use goflow_core::{
    handler_fn, GoFlow, GoFlowConfig, GoFlowError, Handler, HandlerRegistry, Payload, Task,
    TaskResult,
};
