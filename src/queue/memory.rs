use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Channel, InFlightMessage, MessageStream, MetricEvent};
use crate::error::QueueError;

/// In-memory [`Channel`] for tests.
///
/// Exchanges and queues are not durable (the flag is ignored). Messages
/// published before anyone consumes are buffered per queue. A nacked
/// message is counted but never redelivered.
pub struct MemoryChannel {
    inner: Mutex<Inner>,
}

/// Delivery bookkeeping for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub published: u64,
    pub acked: u64,
    pub nacked: u64,
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    exchanges: HashSet<String>,
    queues: HashMap<String, QueueSlot>,
    closed: bool,
}

struct QueueSlot {
    exchange: String,
    tx: Option<mpsc::UnboundedSender<Box<dyn InFlightMessage>>>,
    rx: Option<MessageStream>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
}

struct MemoryMessage {
    event: MetricEvent,
    counters: Arc<Counters>,
    settled: AtomicBool,
}

// ─── MemoryChannel impl ──────────────────────────────────────────

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Counters for `queue`, or `None` if it was never declared.
    pub fn delivery_stats(&self, queue: &str) -> Option<DeliveryStats> {
        let inner = self.inner.lock();
        inner.queues.get(queue).map(|slot| DeliveryStats {
            published: slot.counters.published.load(Ordering::SeqCst),
            acked: slot.counters.acked.load(Ordering::SeqCst),
            nacked: slot.counters.nacked.load(Ordering::SeqCst),
        })
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn declare_exchange(&self, exchange: &str, _durable: bool) -> Result<(), QueueError> {
        self.inner.lock().exchanges.insert(exchange.to_owned());
        Ok(())
    }

    async fn declare_queue(
        &self,
        exchange: &str,
        queue: &str,
        _durable: bool,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if !inner.exchanges.contains(exchange) {
            return Err(QueueError::ExchangeNotFound(exchange.to_owned()));
        }
        if inner.queues.contains_key(queue) {
            return Ok(());
        }

        let closed = inner.closed;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.queues.insert(
            queue.to_owned(),
            QueueSlot {
                exchange: exchange.to_owned(),
                tx: (!closed).then_some(tx),
                rx: Some(rx),
                counters: Arc::new(Counters::default()),
            },
        );
        Ok(())
    }

    async fn publish_metric(&self, exchange: &str, event: &MetricEvent) -> Result<(), QueueError> {
        let inner = self.inner.lock();
        if inner.closed {
            return Err(QueueError::Publish("channel closed".into()));
        }

        for slot in inner.queues.values().filter(|s| s.exchange == exchange) {
            let Some(tx) = &slot.tx else { continue };
            let msg = MemoryMessage {
                event: event.clone(),
                counters: slot.counters.clone(),
                settled: AtomicBool::new(false),
            };
            // A dropped consumer simply loses the message
            if tx.send(Box::new(msg)).is_ok() {
                slot.counters.published.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn consume_metrics(&self, queue: &str) -> Result<MessageStream, QueueError> {
        let mut inner = self.inner.lock();
        let slot = inner
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_owned()))?;
        slot.rx
            .take()
            .ok_or_else(|| QueueError::AlreadyConsuming(queue.to_owned()))
    }

    async fn close(&self) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        // Dropping the senders ends every stream once its buffer drains
        for slot in inner.queues.values_mut() {
            slot.tx = None;
        }
        Ok(())
    }
}

// ─── Message impl ────────────────────────────────────────────────

impl MemoryMessage {
    fn settle(&self) -> Result<(), QueueError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Acknowledge("message already settled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl InFlightMessage for MemoryMessage {
    fn metric_data(&mut self) -> Result<MetricEvent, QueueError> {
        Ok(self.event.clone())
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.settle()?;
        self.counters.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self) -> Result<(), QueueError> {
        self.settle()?;
        self.counters.nacked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn topology() -> MemoryChannel {
        let channel = MemoryChannel::new();
        channel.declare_exchange("foo", true).await.unwrap();
        channel.declare_queue("foo", "bar", true).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn publish_reaches_bound_queue() {
        let channel = topology().await;
        for i in 0..10 {
            let event = MetricEvent::new("user", i, "sample_metric");
            channel.publish_metric("foo", &event).await.unwrap();
        }
        channel.close().await.unwrap();

        let mut stream = channel.consume_metrics("bar").await.unwrap();
        let mut received = 0;
        while let Some(mut msg) = stream.recv().await {
            assert_eq!(msg.metric_data().unwrap().count, received);
            msg.ack().await.unwrap();
            received += 1;
        }
        assert_eq!(received, 10);

        let stats = channel.delivery_stats("bar").unwrap();
        assert_eq!(stats, DeliveryStats { published: 10, acked: 10, nacked: 0 });
    }

    #[tokio::test]
    async fn fanout_hits_every_queue() {
        let channel = topology().await;
        channel.declare_queue("foo", "baz", false).await.unwrap();
        channel
            .publish_metric("foo", &MetricEvent::new("u", 1, "m"))
            .await
            .unwrap();

        assert_eq!(channel.delivery_stats("bar").unwrap().published, 1);
        assert_eq!(channel.delivery_stats("baz").unwrap().published, 1);
    }

    #[tokio::test]
    async fn declarations_are_idempotent() {
        let channel = topology().await;
        channel.declare_exchange("foo", true).await.unwrap();
        channel.declare_queue("foo", "bar", true).await.unwrap();
        channel
            .publish_metric("foo", &MetricEvent::new("u", 1, "m"))
            .await
            .unwrap();
        assert_eq!(channel.delivery_stats("bar").unwrap().published, 1);
    }

    #[tokio::test]
    async fn unknown_queue_is_an_error() {
        let channel = topology().await;
        let err = channel.consume_metrics("nope").await.unwrap_err();
        assert!(matches!(err, QueueError::QueueNotFound(q) if q == "nope"));
    }

    #[tokio::test]
    async fn queue_needs_an_exchange() {
        let channel = MemoryChannel::new();
        let err = channel.declare_queue("missing", "bar", true).await.unwrap_err();
        assert!(matches!(err, QueueError::ExchangeNotFound(_)));
    }

    #[tokio::test]
    async fn publish_without_bindings_is_a_noop() {
        let channel = MemoryChannel::new();
        channel.declare_exchange("lonely", true).await.unwrap();
        channel
            .publish_metric("lonely", &MetricEvent::new("u", 1, "m"))
            .await
            .unwrap();
        channel
            .publish_metric("unknown", &MetricEvent::new("u", 1, "m"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn message_settles_once() {
        let channel = topology().await;
        channel
            .publish_metric("foo", &MetricEvent::new("u", 1, "m"))
            .await
            .unwrap();
        let mut stream = channel.consume_metrics("bar").await.unwrap();
        let msg = stream.recv().await.unwrap();

        msg.nack().await.unwrap();
        assert!(msg.ack().await.is_err());
        let stats = channel.delivery_stats("bar").unwrap();
        assert_eq!((stats.acked, stats.nacked), (0, 1));
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let channel = topology().await;
        let mut stream = channel.consume_metrics("bar").await.unwrap();
        channel.close().await.unwrap();
        assert!(stream.recv().await.is_none());
        assert!(matches!(
            channel.consume_metrics("bar").await,
            Err(QueueError::AlreadyConsuming(_))
        ));
    }
}
