//! Broker backed by a remote list store.
//!
//! Producers `push_left` encoded items onto a key; a single consumer task per
//! broker loops on `blocking_pop_right` with a bounded timeout, which is how it
//! notices cancellation, and forwards decoded items to the broker's receiver.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument, trace, warn};

use super::{withdraw, Broker, BrokerError, BrokerReceiver, BrokerState, Envelope, StateCell};
use crate::codec::{Codec, JsonCodec};
use crate::middleware::{BackoffStrategy, RetryPolicy};
use crate::task::QueueItem;

const INITIAL_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Errors reported by a list store backend.
#[derive(Debug, Error)]
pub enum ListStoreError {
    #[error("backend error: {0}")]
    Backend(String),
}

/// A FIFO list per key: pushes go to the head, pops consume from the tail.
#[async_trait]
pub trait ListStore: Send + Sync + 'static {
    /// Push `value` onto the head of the list at `key`.
    async fn push_left(&self, key: &str, value: Vec<u8>) -> Result<(), ListStoreError>;

    /// Push `value` onto the tail of the list at `key`, making it the next item popped.
    async fn push_right(&self, key: &str, value: Vec<u8>) -> Result<(), ListStoreError>;

    /// Pop from the tail of the list at `key`, waiting up to `timeout` for an item.
    /// Returns `Ok(None)` when the timeout elapses first.
    async fn blocking_pop_right(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ListStoreError>;
}

struct Lists {
    lists: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    pushed: Notify,
    failing_pops: AtomicUsize,
    failing_pushes: AtomicUsize,
}

/// In-memory implementation of ListStore for testing and local development.
#[derive(Clone)]
pub struct InMemoryListStore {
    inner: Arc<Lists>,
}

impl Default for InMemoryListStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryListStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Lists {
                lists: Mutex::new(HashMap::new()),
                pushed: Notify::new(),
                failing_pops: AtomicUsize::new(0),
                failing_pushes: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of items currently stored under `key`.
    pub async fn len(&self, key: &str) -> usize {
        let lists = self.inner.lists.lock().await;
        lists.get(key).map(VecDeque::len).unwrap_or(0)
    }

    /// Items under `key`, head first.
    pub async fn snapshot(&self, key: &str) -> Vec<Vec<u8>> {
        let lists = self.inner.lists.lock().await;
        lists
            .get(key)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Make the next `n` pops fail with a backend error.
    pub fn fail_next_pops(&self, n: usize) {
        self.inner.failing_pops.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` pushes fail with a backend error.
    pub fn fail_next_pushes(&self, n: usize) {
        self.inner.failing_pushes.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn push(&self, key: &str, value: Vec<u8>, head: bool) -> Result<(), ListStoreError> {
        if Self::take_failure(&self.inner.failing_pushes) {
            return Err(ListStoreError::Backend("injected push failure".into()));
        }
        {
            let mut lists = self.inner.lists.lock().await;
            let list = lists.entry(key.to_string()).or_default();
            if head {
                list.push_front(value);
            } else {
                list.push_back(value);
            }
        }
        self.inner.pushed.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl ListStore for InMemoryListStore {
    async fn push_left(&self, key: &str, value: Vec<u8>) -> Result<(), ListStoreError> {
        self.push(key, value, true).await
    }

    async fn push_right(&self, key: &str, value: Vec<u8>) -> Result<(), ListStoreError> {
        self.push(key, value, false).await
    }

    async fn blocking_pop_right(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, ListStoreError> {
        if Self::take_failure(&self.inner.failing_pops) {
            return Err(ListStoreError::Backend("injected pop failure".into()));
        }
        let deadline = Instant::now() + timeout;
        loop {
            // Registered before checking the list so a concurrent push cannot be missed.
            let pushed = self.inner.pushed.notified();
            {
                let mut lists = self.inner.lists.lock().await;
                if let Some(value) = lists.get_mut(key).and_then(VecDeque::pop_back) {
                    return Ok(Some(value));
                }
            }
            if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }
}

/// Which operations a [`ListBroker`] is equipped for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueDirection {
    Submit,
    Dequeue,
    Both,
}

impl QueueDirection {
    pub fn can_submit(self) -> bool {
        matches!(self, QueueDirection::Submit | QueueDirection::Both)
    }

    pub fn can_dequeue(self) -> bool {
        matches!(self, QueueDirection::Dequeue | QueueDirection::Both)
    }
}

/// Tuning for a [`ListBroker`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListBrokerConfig {
    /// Timeout passed to `blocking_pop_right`; bounds the delay between
    /// cancellation and consumer exit.
    #[serde(with = "duration_ms", rename = "poll_timeout_ms")]
    pub poll_timeout: Duration,
    /// Upper bound for the delay between retries after backend errors.
    #[serde(with = "duration_ms", rename = "max_error_backoff_ms")]
    pub max_error_backoff: Duration,
    /// Name recorded on this broker's log events. Defaults to the queue key.
    pub label: Option<String>,
    /// Key receiving raw bytes that could not be decoded. When unset such
    /// items are logged and discarded.
    pub dead_letter_key: Option<String>,
}

impl Default for ListBrokerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            max_error_backoff: Duration::from_secs(1),
            label: None,
            dead_letter_key: None,
        }
    }
}

impl ListBrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_max_error_backoff(mut self, backoff: Duration) -> Self {
        self.max_error_backoff = backoff;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_dead_letter_key(mut self, key: impl Into<String>) -> Self {
        self.dead_letter_key = Some(key.into());
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// A broker over one key of a [`ListStore`].
///
/// Items are removed from the backend when popped, so delivery is
/// at-most-once: an item that cannot be decoded is dead-lettered or dropped,
/// never redelivered.
pub struct ListBroker<T: QueueItem, S: ListStore> {
    store: Arc<S>,
    key: String,
    codec: Arc<dyn Codec<T>>,
    direction: QueueDirection,
    config: ListBrokerConfig,
    receiver: Mutex<Option<BrokerReceiver<T>>>,
    state: StateCell,
    tracker: TaskTracker,
}

impl<T: QueueItem, S: ListStore> ListBroker<T, S> {
    fn with_direction(store: Arc<S>, direction: QueueDirection) -> Self {
        Self {
            store,
            key: T::QUEUE_KEY.to_string(),
            codec: Arc::new(JsonCodec),
            direction,
            config: ListBrokerConfig::default(),
            receiver: Mutex::new(None),
            state: StateCell::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// A producer-side endpoint: `dequeue` fails with `Misconfigured`.
    pub fn submit_only(store: Arc<S>) -> Self {
        Self::with_direction(store, QueueDirection::Submit)
    }

    /// A consumer-side endpoint: `submit` fails with `Misconfigured`.
    pub fn dequeue_only(store: Arc<S>) -> Self {
        Self::with_direction(store, QueueDirection::Dequeue)
    }

    pub fn bidirectional(store: Arc<S>) -> Self {
        Self::with_direction(store, QueueDirection::Both)
    }

    /// Use `key` instead of the item type's default queue key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_codec(mut self, codec: impl Codec<T>) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn with_config(mut self, config: ListBrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn direction(&self) -> QueueDirection {
        self.direction
    }

    fn label(&self) -> String {
        self.config.label.clone().unwrap_or_else(|| self.key.clone())
    }
}

#[async_trait]
impl<T: QueueItem, S: ListStore> Broker<T> for ListBroker<T, S> {
    #[instrument(skip(self, ctx, item), fields(key = %self.key), level = "trace")]
    async fn submit(&self, ctx: &CancellationToken, item: T) -> Result<(), BrokerError> {
        if !self.direction.can_submit() {
            return Err(BrokerError::Misconfigured(format!(
                "list broker on '{}' is dequeue-only",
                self.key
            )));
        }
        if ctx.is_cancelled() || self.state.get() == BrokerState::Terminated {
            return Err(BrokerError::Cancelled);
        }
        let bytes = self.codec.encode(&item)?;
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(BrokerError::Cancelled),
            pushed = self.store.push_left(&self.key, bytes) => {
                pushed?;
                trace!(id = item.item_id(), "pushed item");
                Ok(())
            }
        }
    }

    async fn dequeue(&self, ctx: &CancellationToken) -> Result<BrokerReceiver<T>, BrokerError> {
        if !self.direction.can_dequeue() {
            return Err(BrokerError::Misconfigured(format!(
                "list broker on '{}' is submit-only",
                self.key
            )));
        }
        let mut slot = self.receiver.lock().await;
        if let Some(rx) = slot.as_ref() {
            return Ok(rx.clone());
        }

        // One slot, but the consumer waits for each item to be taken before popping the next.
        let (tx, rx) = mpsc::channel(1);
        let rx = BrokerReceiver::new(rx);
        *slot = Some(rx.clone());
        self.state.set(BrokerState::Started);

        let consumer = Consumer {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            label: self.label(),
            codec: Arc::clone(&self.codec),
            config: self.config.clone(),
            state: self.state.clone(),
            ctx: ctx.clone(),
            tx,
        };
        self.tracker.spawn(consumer.run());
        Ok(rx)
    }

    async fn await_shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn state(&self) -> BrokerState {
        self.state.get()
    }
}

/// Delay schedule for consecutive pop failures: 50ms doubling up to `max_error_backoff`.
pub(crate) fn error_backoff_policy(config: &ListBrokerConfig) -> RetryPolicy {
    RetryPolicy::new(
        usize::MAX,
        INITIAL_ERROR_BACKOFF,
        config.max_error_backoff,
        BackoffStrategy::Exponential,
    )
}

/// The single internal task draining one key into a receiver.
struct Consumer<T: QueueItem, S: ListStore> {
    store: Arc<S>,
    key: String,
    label: String,
    codec: Arc<dyn Codec<T>>,
    config: ListBrokerConfig,
    state: StateCell,
    ctx: CancellationToken,
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T: QueueItem, S: ListStore> Consumer<T, S> {
    async fn run(self) {
        debug!(broker = %self.label, key = %self.key, "list consumer started");
        let backoff = error_backoff_policy(&self.config);
        let mut failures = 0;

        while !self.ctx.is_cancelled() {
            match self.pop().await {
                Ok(None) => failures = 0,
                Ok(Some(bytes)) => {
                    failures = 0;
                    self.deliver(bytes).await;
                }
                Err(e) => {
                    failures += 1;
                    let delay = backoff.backoff_duration(failures);
                    warn!(broker = %self.label, key = %self.key, error = %e, ?delay, "list store pop failed");
                    tokio::select! {
                        _ = self.ctx.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.state.set(BrokerState::Draining);
        drop(self.tx);
        self.state.set(BrokerState::Terminated);
        debug!(broker = %self.label, key = %self.key, "list consumer stopped");
    }

    /// One bounded pop. The pop itself is never abandoned: an item already
    /// taken off the backend must reach `deliver`.
    async fn pop(&self) -> Result<Option<Vec<u8>>, ListStoreError> {
        let pop = self
            .store
            .blocking_pop_right(&self.key, self.config.poll_timeout);
        tokio::pin!(pop);
        let mut draining = false;
        loop {
            tokio::select! {
                popped = &mut pop => return popped,
                _ = self.ctx.cancelled(), if !draining => {
                    draining = true;
                    self.state.set(BrokerState::Draining);
                }
            }
        }
    }

    async fn deliver(&self, bytes: Vec<u8>) {
        let item = match self.codec.decode(&bytes) {
            Ok(item) => item,
            Err(e) => {
                self.dead_letter(bytes, e.to_string()).await;
                return;
            }
        };

        let id = item.item_id().to_string();
        let (envelope, mut delivered) = Envelope::rendezvous(item);
        tokio::select! {
            biased;
            sent = self.tx.send(envelope) => {
                if sent.is_err() {
                    warn!(broker = %self.label, id = %id, "receiver dropped; requeueing item");
                    self.requeue(bytes, &id).await;
                    return;
                }
            }
            _ = self.ctx.cancelled() => {
                debug!(broker = %self.label, id = %id, "cancelled before delivery; requeueing item");
                self.requeue(bytes, &id).await;
                return;
            }
        }

        // The item counts as delivered only once a receiver has taken it.
        tokio::select! {
            biased;
            taken = &mut delivered => match taken {
                Ok(()) => trace!(broker = %self.label, id = %id, "delivered item"),
                Err(_) => {
                    warn!(broker = %self.label, id = %id, "receiver dropped; requeueing item");
                    self.requeue(bytes, &id).await;
                }
            },
            _ = self.ctx.cancelled() => {
                if withdraw(delivered) {
                    trace!(broker = %self.label, id = %id, "delivered item");
                } else {
                    debug!(broker = %self.label, id = %id, "cancelled before delivery; requeueing item");
                    self.requeue(bytes, &id).await;
                }
            }
        }
    }

    async fn requeue(&self, bytes: Vec<u8>, id: &str) {
        if let Err(e) = self.store.push_right(&self.key, bytes).await {
            error!(broker = %self.label, key = %self.key, id = %id, error = %e, "failed to requeue item; item lost");
        }
    }

    async fn dead_letter(&self, bytes: Vec<u8>, reason: String) {
        match &self.config.dead_letter_key {
            Some(dlq) => {
                warn!(broker = %self.label, key = %self.key, dead_letter_key = %dlq, error = %reason, "undecodable item moved to dead-letter list");
                if let Err(e) = self.store.push_left(dlq, bytes).await {
                    error!(broker = %self.label, dead_letter_key = %dlq, error = %e, "failed to dead-letter item; item lost");
                }
            }
            None => {
                error!(broker = %self.label, key = %self.key, error = %reason, "discarding undecodable item");
            }
        }
    }
}
