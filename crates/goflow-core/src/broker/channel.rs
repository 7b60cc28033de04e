//! In-process broker backed by a bounded tokio channel.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use super::{withdraw, Broker, BrokerError, BrokerReceiver, BrokerState, Envelope, StateCell};
use crate::task::QueueItem;

/// A bounded in-process FIFO.
///
/// With capacity `C > 0`, `submit` suspends while `C` items are buffered.
/// With capacity `0` the queue is a rendezvous: `submit` returns only once a
/// receiver has taken the item, and a submit that fails with
/// [`BrokerError::Cancelled`] is never delivered. No serialisation takes place.
pub struct ChannelBroker<T: QueueItem> {
    capacity: usize,
    sender: Arc<Mutex<Option<mpsc::Sender<Envelope<T>>>>>,
    receiver: BrokerReceiver<T>,
    started: AtomicBool,
    state: StateCell,
    tracker: TaskTracker,
}

impl<T: QueueItem> ChannelBroker<T> {
    /// Create a channel broker holding up to `capacity` buffered items.
    pub fn new(capacity: usize) -> Self {
        // tokio channels need at least one slot; capacity 0 is emulated with
        // a delivery acknowledgement on top of a single slot.
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            capacity,
            sender: Arc::new(Mutex::new(Some(tx))),
            receiver: BrokerReceiver::new(rx),
            started: AtomicBool::new(false),
            state: StateCell::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl<T: QueueItem> Broker<T> for ChannelBroker<T> {
    async fn submit(&self, ctx: &CancellationToken, item: T) -> Result<(), BrokerError> {
        if ctx.is_cancelled() {
            return Err(BrokerError::Cancelled);
        }
        let sender = self
            .sender
            .lock()
            .await
            .clone()
            .ok_or(BrokerError::Cancelled)?;

        if self.capacity == 0 {
            let (envelope, delivered) = Envelope::rendezvous(item);
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(BrokerError::Cancelled),
                sent = sender.send(envelope) => sent.map_err(|_| BrokerError::Cancelled)?,
            }
            drop(sender);
            let mut delivered = delivered;
            tokio::select! {
                biased;
                taken = &mut delivered => taken.map_err(|_| BrokerError::Cancelled),
                _ = ctx.cancelled() => {
                    if withdraw(delivered) {
                        Ok(())
                    } else {
                        Err(BrokerError::Cancelled)
                    }
                }
            }
        } else {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => Err(BrokerError::Cancelled),
                sent = sender.send(Envelope::new(item)) => sent.map_err(|_| BrokerError::Cancelled),
            }
        }
    }

    async fn dequeue(&self, ctx: &CancellationToken) -> Result<BrokerReceiver<T>, BrokerError> {
        if !self.started.swap(true, Ordering::AcqRel) {
            self.state.set(BrokerState::Started);
            let ctx = ctx.clone();
            let sender = Arc::clone(&self.sender);
            let state = self.state.clone();
            self.tracker.spawn(async move {
                ctx.cancelled().await;
                state.set(BrokerState::Draining);
                // Dropping the last sender lets the receiver drain and then see end-of-stream.
                sender.lock().await.take();
                state.set(BrokerState::Terminated);
                debug!("channel broker closed");
            });
        }
        Ok(self.receiver.clone())
    }

    async fn await_shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn state(&self) -> BrokerState {
        self.state.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn task(n: i64) -> Task {
        Task::with_id(format!("t{n}"), "echo", json!(n))
    }

    #[tokio::test]
    async fn test_fifo_single_producer_consumer() {
        let ctx = CancellationToken::new();
        let broker = Arc::new(ChannelBroker::<Task>::new(4));
        let rx = broker.dequeue(&ctx).await.unwrap();

        let producer = {
            let broker = Arc::clone(&broker);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                for n in 0..50 {
                    broker.submit(&ctx, task(n)).await.unwrap();
                }
            })
        };

        for n in 0..50 {
            let got = rx.recv().await.expect("item");
            assert_eq!(got.id, format!("t{n}"));
        }
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_capacity_submit_waits_for_dequeue() {
        let ctx = CancellationToken::new();
        let broker = Arc::new(ChannelBroker::<Task>::new(0));

        let submit = {
            let broker = Arc::clone(&broker);
            let ctx = ctx.clone();
            tokio::spawn(async move { broker.submit(&ctx, task(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!submit.is_finished(), "submit returned before any dequeue");

        let rx = broker.dequeue(&ctx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().id, "t1");
        timeout(Duration::from_secs(1), submit)
            .await
            .expect("submit completes after dequeue")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_rendezvous_is_never_received() {
        let ctx = CancellationToken::new();
        let broker = Arc::new(ChannelBroker::<Task>::new(0));
        let rx = broker.dequeue(&CancellationToken::new()).await.unwrap();

        let submit = {
            let broker = Arc::clone(&broker);
            let ctx = ctx.clone();
            tokio::spawn(async move { broker.submit(&ctx, task(1)).await })
        };
        // Let the item reach the slot, then give up on it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.cancel();
        let err = timeout(Duration::from_secs(1), submit)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled));

        let next = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.submit(&CancellationToken::new(), task(2)).await })
        };
        let got = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(got.unwrap().id, "t2");
        next.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_full_buffer_submit_honours_cancellation() {
        let ctx = CancellationToken::new();
        let broker = ChannelBroker::<Task>::new(1);
        broker.submit(&ctx, task(1)).await.unwrap();

        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let err = broker.submit(&ctx, task(2)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancellation_drains_then_closes() {
        let ctx = CancellationToken::new();
        let broker = ChannelBroker::<Task>::new(8);
        assert_eq!(broker.state(), BrokerState::Created);
        let rx = broker.dequeue(&ctx).await.unwrap();
        assert_eq!(broker.state(), BrokerState::Started);

        for n in 0..3 {
            broker.submit(&ctx, task(n)).await.unwrap();
        }
        ctx.cancel();
        timeout(Duration::from_secs(1), broker.await_shutdown())
            .await
            .expect("shutdown");
        assert_eq!(broker.state(), BrokerState::Terminated);

        let mut drained = Vec::new();
        while let Some(t) = rx.recv().await {
            drained.push(t.id);
        }
        assert_eq!(drained, vec!["t0", "t1", "t2"]);

        let err = broker
            .submit(&CancellationToken::new(), task(9))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled));
    }

    #[tokio::test]
    async fn test_dequeue_returns_same_queue() {
        let ctx = CancellationToken::new();
        let broker = ChannelBroker::<Task>::new(2);
        let a = broker.dequeue(&ctx).await.unwrap();
        let b = broker.dequeue(&ctx).await.unwrap();
        broker.submit(&ctx, task(1)).await.unwrap();
        broker.submit(&ctx, task(2)).await.unwrap();
        assert_eq!(b.recv().await.unwrap().id, "t1");
        assert_eq!(a.recv().await.unwrap().id, "t2");
    }

    #[tokio::test]
    async fn test_await_shutdown_without_dequeue_returns() {
        let broker = ChannelBroker::<Task>::new(0);
        timeout(Duration::from_millis(100), broker.await_shutdown())
            .await
            .expect("nothing to wait for");
    }
}
