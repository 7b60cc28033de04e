use thiserror::Error;

use crate::broker::BrokerError;
use crate::store::StoreError;

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, Error)]
pub enum GoFlowError {
    /// The orchestrator has not been started yet.
    #[error("GoFlow has not been started")]
    NotStarted,
    /// `start` was called on an orchestrator that is already running.
    #[error("GoFlow already started")]
    AlreadyStarted,
    /// The orchestrator was closed; it cannot be used or restarted.
    #[error("GoFlow is closed")]
    Closed,
    /// A broker rejected a submit or dequeue.
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
    /// The results store rejected a read or write.
    #[error("results store error: {0}")]
    Store(#[from] StoreError),
    /// The builder was missing a required component.
    #[error("misconfigured: {0}")]
    Misconfigured(String),
}
