//! Queue brokers.
//!
//! A broker is a FIFO of [`QueueItem`]s with a typed `submit` side and a
//! `dequeue` side that hands out a shared [`BrokerReceiver`]. Two backends
//! exist: [`ChannelBroker`] (in-process, bounded) and [`ListBroker`] (a
//! remote list store such as Redis).
//!
//! Every broker moves through `Created → Started → Draining → Terminated`:
//! the first `dequeue` starts its internal consumer, cancellation of the
//! dequeue token drains it, and `await_shutdown` returns once it has exited.

mod channel;
mod list;

pub use channel::ChannelBroker;
pub use list::{
    InMemoryListStore, ListBroker, ListBrokerConfig, ListStore, ListStoreError, QueueDirection,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::codec::CodecError;
use crate::task::QueueItem;

/// Errors returned by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("encode error: {0}")]
    Encode(#[from] CodecError),
    #[error("backend error: {0}")]
    Backend(#[from] ListStoreError),
    #[error("broker cancelled")]
    Cancelled,
    #[error("broker misconfigured: {0}")]
    Misconfigured(String),
}

/// Lifecycle of a broker's internal consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Created,
    Started,
    Draining,
    Terminated,
}

impl BrokerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BrokerState::Created,
            1 => BrokerState::Started,
            2 => BrokerState::Draining,
            _ => BrokerState::Terminated,
        }
    }
}

/// Shared, lock-free cell holding a [`BrokerState`].
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<AtomicU8>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(BrokerState::Created as u8)))
    }

    pub(crate) fn get(&self) -> BrokerState {
        BrokerState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: BrokerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// A FIFO queue with typed submit and dequeue.
#[async_trait]
pub trait Broker<T: QueueItem>: Send + Sync + 'static {
    /// Append `item` at the tail of the queue.
    ///
    /// Suspends while the backend applies back-pressure and fails with
    /// [`BrokerError::Cancelled`] once `ctx` is cancelled or the broker has terminated.
    async fn submit(&self, ctx: &CancellationToken, item: T) -> Result<(), BrokerError>;

    /// Return the receiver for this queue, starting the internal consumer on
    /// the first call. Later calls return a handle to the same receiver.
    ///
    /// The receiver reports end-of-stream once the consumer has observed
    /// cancellation of `ctx` and residual items have been drained.
    async fn dequeue(&self, ctx: &CancellationToken) -> Result<BrokerReceiver<T>, BrokerError>;

    /// Wait until the internal consumer has exited and released its resources.
    /// Returns immediately if `dequeue` was never called.
    async fn await_shutdown(&self);

    /// Current lifecycle state.
    fn state(&self) -> BrokerState;
}

/// A broker shared between the orchestrator, the worker pool and the result writer.
pub type SharedBroker<T> = Arc<dyn Broker<T>>;

/// An item in flight between a broker and its receiver.
///
/// `delivered` is set for rendezvous hand-offs: the sender waits until a
/// receiver has taken the item, and may withdraw it with [`withdraw`] if it
/// gives up first.
pub(crate) struct Envelope<T> {
    pub(crate) item: T,
    pub(crate) delivered: Option<oneshot::Sender<()>>,
}

impl<T> Envelope<T> {
    pub(crate) fn new(item: T) -> Self {
        Self {
            item,
            delivered: None,
        }
    }

    pub(crate) fn rendezvous(item: T) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                item,
                delivered: Some(tx),
            },
            rx,
        )
    }

    /// Take the item, acknowledging a rendezvous. `None` if the sender withdrew it.
    fn open(self) -> Option<T> {
        if let Some(tx) = self.delivered {
            tx.send(()).ok()?;
        }
        Some(self.item)
    }
}

/// Withdraw a rendezvous item that may still be sitting in the channel.
///
/// Returns `true` if a receiver took it before the withdrawal; otherwise the
/// receiver will skip the envelope and the caller still owns the item.
pub(crate) fn withdraw(mut delivered: oneshot::Receiver<()>) -> bool {
    delivered.close();
    delivered.try_recv().is_ok()
}

/// Receiving side of a broker.
///
/// Cloning yields another handle on the same queue; each item is observed by
/// exactly one `recv` caller, which is what lets several workers share a task
/// source.
pub struct BrokerReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<Envelope<T>>>>,
}

impl<T> Clone for BrokerReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BrokerReceiver<T> {
    pub(crate) fn new(rx: mpsc::Receiver<Envelope<T>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    /// Receive the next item in FIFO order, or `None` once the queue has closed
    /// and every residual item has been handed out.
    ///
    /// Cancel safe: dropping the future never loses an item.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.inner.lock().await;
        while let Some(envelope) = rx.recv().await {
            if let Some(item) = envelope.open() {
                return Some(item);
            }
        }
        None
    }
}
