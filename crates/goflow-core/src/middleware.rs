//! Handler decorators: retry, timeout and timing.
//!
//! Decorators wrap a [`Handler`] and are themselves handlers, so they compose
//! right to left: `with_retry(with_timeout(h, d), n)` times out every attempt
//! independently.
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::handler::Handler;
use crate::task::{Payload, TaskResult};

/// Error message reported by [`TimeoutHandler`] when the inner handler is too slow.
pub const TIMED_OUT_MSG: &str = "Task timed out";

/// Strategy for computing backoff durations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Delay = initial_backoff * attempt_count
    #[default]
    Linear,
    /// Delay = initial_backoff * 2^(attempt_count - 1)
    Exponential,
}

/// Policy controlling retry behavior for handlers.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: usize,
    /// Initial backoff duration between retries.
    pub initial_backoff: Duration,
    /// Maximum backoff duration allowed.
    pub max_backoff: Duration,
    /// Strategy to compute backoff durations.
    pub strategy: BackoffStrategy,
    /// Optional fixed jitter to add to each backoff.
    pub jitter: Option<Duration>,
}

impl RetryPolicy {
    /// Construct a new RetryPolicy.
    pub fn new(
        max_attempts: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        strategy: BackoffStrategy,
    ) -> Self {
        RetryPolicy {
            max_attempts,
            initial_backoff,
            max_backoff,
            strategy,
            jitter: None,
        }
    }

    /// Up to `max_attempts` attempts back to back.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(
            max_attempts,
            Duration::ZERO,
            Duration::ZERO,
            BackoffStrategy::Linear,
        )
    }

    /// Specify a fixed jitter offset to add to each backoff.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Whether another attempt follows a failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }

    /// Compute the backoff duration before the next retry given the attempt count (1-based).
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        let base = match self.strategy {
            BackoffStrategy::Linear => self.initial_backoff.saturating_mul(attempt as u32),
            BackoffStrategy::Exponential => {
                // Compute 2^(attempt-1) with shift, saturating at 32 bits
                let exp = attempt.saturating_sub(1);
                let factor = if exp < 32 { 1_u32 << exp } else { u32::MAX };
                self.initial_backoff.saturating_mul(factor)
            }
        };
        let capped = base.min(self.max_backoff);
        match self.jitter {
            Some(j) => capped.saturating_add(j),
            None => capped,
        }
    }
}

/// Wrap `handler` so failed results are retried, up to `attempts` calls in total.
pub fn with_retry<H: Handler>(handler: H, attempts: usize) -> RetryHandler<H> {
    RetryHandler::new(handler, RetryPolicy::immediate(attempts))
}

/// Wrap `handler` with an explicit retry policy.
pub fn with_retry_policy<H: Handler>(handler: H, policy: RetryPolicy) -> RetryHandler<H> {
    RetryHandler::new(handler, policy)
}

/// Re-invokes the inner handler while it reports failure.
///
/// Stops at the first result without an error message and otherwise returns
/// the last failed result. A policy allowing zero attempts still calls once.
#[derive(Clone, Debug)]
pub struct RetryHandler<H> {
    pub inner: H,
    pub policy: RetryPolicy,
}

impl<H> RetryHandler<H> {
    pub fn new(inner: H, policy: RetryPolicy) -> Self {
        RetryHandler { inner, policy }
    }
}

#[async_trait]
impl<H: Handler> Handler for RetryHandler<H> {
    async fn handle(&self, payload: Payload) -> TaskResult {
        let mut attempt = 1;
        loop {
            let result = self.inner.handle(payload.clone()).await;
            if !result.is_failure() {
                return result;
            }
            tracing::debug!(attempt, error = ?result.err_msg, "RetryHandler: handler failed, evaluating retry policy");
            if !self.policy.should_retry(attempt) {
                tracing::warn!(attempt, error = ?result.err_msg, "RetryHandler: giving up after reaching retry limit");
                return result;
            }
            let backoff = self.policy.backoff_duration(attempt);
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            attempt += 1;
        }
    }
}

/// Wrap `handler` so it fails with [`TIMED_OUT_MSG`] when it runs longer than `timeout`.
pub fn with_timeout<H: Handler>(handler: H, timeout: Duration) -> TimeoutHandler<H> {
    TimeoutHandler {
        inner: Arc::new(handler),
        timeout,
    }
}

/// Runs the inner handler on its own task and stops waiting after `timeout`.
///
/// The abandoned invocation is not cancelled: it runs to completion and its
/// result is discarded.
pub struct TimeoutHandler<H> {
    inner: Arc<H>,
    timeout: Duration,
}

impl<H> Clone for TimeoutHandler<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            timeout: self.timeout,
        }
    }
}

#[async_trait]
impl<H: Handler> Handler for TimeoutHandler<H> {
    async fn handle(&self, payload: Payload) -> TaskResult {
        let inner = Arc::clone(&self.inner);
        let call = tokio::spawn(async move { inner.handle(payload).await });
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => TaskResult::err(format!("handler panicked: {join_err}")),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "TimeoutHandler: handler exceeded its deadline");
                TaskResult::err(TIMED_OUT_MSG)
            }
        }
    }
}

/// Wrap `handler` so every call logs its wall-clock duration under `label`.
pub fn with_report_time<H: Handler>(handler: H, label: impl Into<String>) -> ReportTimeHandler<H> {
    ReportTimeHandler {
        inner: handler,
        label: label.into(),
    }
}

#[derive(Clone, Debug)]
pub struct ReportTimeHandler<H> {
    inner: H,
    label: String,
}

#[async_trait]
impl<H: Handler> Handler for ReportTimeHandler<H> {
    async fn handle(&self, payload: Payload) -> TaskResult {
        let started = Instant::now();
        let result = self.inner.handle(payload).await;
        tracing::info!(
            handler = %self.label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            failed = result.is_failure(),
            "handler finished"
        );
        result
    }
}
