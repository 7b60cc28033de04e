//! Units of work and their outcomes.
//!
//! A [`Task`] travels on the task queue, a [`TaskResult`] on the result queue.
//! Both are [`QueueItem`]s so brokers, codecs and stores can be written once.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Opaque, caller-defined payload carried by tasks and results.
///
/// `Value::Null` stands for "no payload".
pub type Payload = serde_json::Value;

/// Queue key used for tasks in a list-backed deployment.
pub const TASKS_KEY: &str = "tasks";
/// Queue key used for results in a list-backed deployment.
pub const RESULTS_KEY: &str = "results";

/// A unit of work dispatched to the handler registered under `task_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: String,
    #[serde(default)]
    pub payload: Payload,
}

impl Task {
    /// Create a task with a freshly generated UUID v4 identifier.
    pub fn new(task_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            payload,
        }
    }

    /// Create a task with a caller-chosen identifier.
    pub fn with_id(id: impl Into<String>, task_type: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            payload,
        }
    }
}

/// Outcome of running a handler for one task.
///
/// At least one of `payload` and `err_msg` is populated; a handler reporting a
/// partial outcome may populate both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskResult {
    /// Set by the worker from the originating task, never trusted from the handler.
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err_msg: Option<String>,
}

impl TaskResult {
    /// A successful result.
    pub fn ok(payload: Payload) -> Self {
        Self {
            task_id: String::new(),
            payload,
            err_msg: None,
        }
    }

    /// A failed result with no payload.
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            task_id: String::new(),
            payload: Payload::Null,
            err_msg: Some(msg.into()),
        }
    }

    /// A result carrying both a payload and an error message.
    pub fn partial(payload: Payload, msg: impl Into<String>) -> Self {
        Self {
            task_id: String::new(),
            payload,
            err_msg: Some(msg.into()),
        }
    }

    /// Returns true if the handler reported a non-empty error message.
    pub fn is_failure(&self) -> bool {
        self.err_msg.as_deref().is_some_and(|m| !m.is_empty())
    }

    /// Returns true if the result carries a payload.
    pub fn has_payload(&self) -> bool {
        !self.payload.is_null()
    }

    pub(crate) fn for_task(mut self, task_id: &str) -> Self {
        self.task_id = task_id.to_string();
        self
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Task {}
    impl Sealed for super::TaskResult {}
}

/// An element that may travel through a broker: either a [`Task`] or a [`TaskResult`].
pub trait QueueItem:
    sealed::Sealed + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
    /// Default list key for this item type.
    const QUEUE_KEY: &'static str;

    /// Identifier used in logs: the task id for both item kinds.
    fn item_id(&self) -> &str;
}

impl QueueItem for Task {
    const QUEUE_KEY: &'static str = TASKS_KEY;

    fn item_id(&self) -> &str {
        &self.id
    }
}

impl QueueItem for TaskResult {
    const QUEUE_KEY: &'static str = RESULTS_KEY;

    fn item_id(&self) -> &str {
        &self.task_id
    }
}
