//! In-process delivery substrate.
//!
//! Models a broker with one direct exchange: a routing key maps to the set of
//! queues bound under it, each queue is a FIFO of ready messages plus a table
//! of delivered-but-unacknowledged ones. Nothing survives the process, so the
//! durable flag is only checked for consistency on re-declare.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::error::NetError;
use crate::substrate::{Consumer, Delivery, DeliverySubstrate, QueueOptions};

#[derive(Debug, Clone)]
struct Envelope {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    unacked: HashMap<u64, Envelope>,
    next_delivery_tag: u64,
}

#[derive(Debug)]
struct MemoryQueue {
    name: String,
    options: QueueOptions,
    state: Mutex<QueueState>,
    /// Woken on enqueue, requeue, ack and deletion.
    notify: Notify,
    deleted: AtomicBool,
}

impl MemoryQueue {
    fn new(name: &str, options: QueueOptions) -> Self {
        Self {
            name: name.to_string(),
            options,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, payload: Vec<u8>) {
        self.state().ready.push_back(Envelope {
            payload,
            redelivered: false,
        });
        self.notify.notify_waiters();
    }

    fn take(&self) -> Option<(u64, Envelope)> {
        let mut state = self.state();
        let envelope = state.ready.pop_front()?;
        let tag = state.next_delivery_tag;
        state.next_delivery_tag += 1;
        state.unacked.insert(tag, envelope.clone());
        Some((tag, envelope))
    }

    fn settle(&self, delivery_tag: u64, requeue: bool) {
        {
            let mut state = self.state();
            if let Some(mut envelope) = state.unacked.remove(&delivery_tag)
                && requeue
            {
                envelope.redelivered = true;
                state.ready.push_front(envelope);
            }
        }
        self.notify.notify_waiters();
    }
}

#[derive(Debug, Default)]
struct Broker {
    queues: DashMap<String, Arc<MemoryQueue>>,
    /// Routing key → names of the queues bound under it.
    bindings: DashMap<String, HashSet<String>>,
}

/// A broker living inside the current process.
///
/// Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemorySubstrate {
    broker: Arc<Broker>,
}

impl MemorySubstrate {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages waiting in a queue (excluding unacknowledged ones).
    #[must_use]
    pub fn ready_count(&self, queue: &str) -> Option<usize> {
        self.broker.queues.get(queue).map(|q| q.state().ready.len())
    }

    /// Number of delivered but unacknowledged messages in a queue.
    #[must_use]
    pub fn unacked_count(&self, queue: &str) -> Option<usize> {
        self.broker.queues.get(queue).map(|q| q.state().unacked.len())
    }

    /// Whether a queue currently exists.
    #[must_use]
    pub fn has_queue(&self, queue: &str) -> bool {
        self.broker.queues.contains_key(queue)
    }

    /// Whether `queue` is bound under `routing_key`.
    #[must_use]
    pub fn is_bound(&self, queue: &str, routing_key: &str) -> bool {
        self.broker
            .bindings
            .get(routing_key)
            .is_some_and(|queues| queues.contains(queue))
    }

    fn queue(&self, name: &str) -> Result<Arc<MemoryQueue>, NetError> {
        self.broker
            .queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| NetError::QueueNotFound(name.to_string()))
    }
}

impl DeliverySubstrate for MemorySubstrate {
    type Consumer = MemoryConsumer;

    async fn declare_queue(&self, queue: &str, options: QueueOptions) -> Result<(), NetError> {
        let existing = self
            .broker
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(MemoryQueue::new(queue, options)))
            .options;
        if existing != options {
            return Err(NetError::QueueMismatch {
                queue: queue.to_string(),
                existing_durable: existing.durable,
            });
        }
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, routing_key: &str) -> Result<(), NetError> {
        if !self.broker.queues.contains_key(queue) {
            return Err(NetError::QueueNotFound(queue.to_string()));
        }
        self.broker
            .bindings
            .entry(routing_key.to_string())
            .or_default()
            .insert(queue.to_string());
        Ok(())
    }

    async fn publish_persistent(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), NetError> {
        let targets: Vec<String> = match self.broker.bindings.get(routing_key) {
            Some(queues) => queues.iter().cloned().collect(),
            None => Vec::new(),
        };
        if targets.is_empty() {
            debug!(routing_key, "no binding for routing key, message dropped");
            return Ok(());
        }
        for name in targets {
            if let Some(queue) = self.broker.queues.get(&name).map(|q| Arc::clone(q.value())) {
                queue.push(payload.clone());
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<MemoryConsumer, NetError> {
        let queue = self.queue(queue)?;
        Ok(MemoryConsumer {
            queue,
            tag: format!("ctag-{}", Uuid::new_v4()),
            // Zero means unlimited, as in AMQP basic.qos.
            prefetch: if prefetch == 0 {
                usize::MAX
            } else {
                usize::from(prefetch)
            },
            outstanding: Arc::new(AtomicUsize::new(0)),
            cancelled: false,
        })
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), NetError> {
        let Some((_, removed)) = self.broker.queues.remove(queue) else {
            return Ok(());
        };
        self.broker.bindings.retain(|_, queues| {
            queues.remove(queue);
            !queues.is_empty()
        });
        removed.deleted.store(true, Ordering::SeqCst);
        removed.notify.notify_waiters();
        Ok(())
    }
}

/// Consumer registration on a [`MemorySubstrate`] queue.
#[derive(Debug)]
pub struct MemoryConsumer {
    queue: Arc<MemoryQueue>,
    tag: String,
    prefetch: usize,
    /// Deliveries handed out by this consumer and not yet settled.
    outstanding: Arc<AtomicUsize>,
    cancelled: bool,
}

impl Consumer for MemoryConsumer {
    type Delivery = MemoryDelivery;

    fn tag(&self) -> &str {
        &self.tag
    }

    async fn next(&mut self) -> Result<MemoryDelivery, NetError> {
        loop {
            if self.cancelled {
                return Err(NetError::ConsumerCancelled(self.tag.clone()));
            }
            let notified = self.queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.queue.deleted.load(Ordering::SeqCst) {
                return Err(NetError::QueueNotFound(self.queue.name.clone()));
            }

            if self.outstanding.load(Ordering::SeqCst) < self.prefetch
                && let Some((delivery_tag, envelope)) = self.queue.take()
            {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                return Ok(MemoryDelivery {
                    queue: Arc::clone(&self.queue),
                    delivery_tag,
                    envelope,
                    outstanding: Arc::clone(&self.outstanding),
                    settled: false,
                });
            }

            notified.await;
        }
    }

    async fn cancel(mut self) -> Result<(), NetError> {
        self.cancelled = true;
        debug!(consumer = self.tag, queue = self.queue.name, "consumer cancelled");
        Ok(())
    }
}

/// A message delivered by a [`MemoryConsumer`].
#[derive(Debug)]
pub struct MemoryDelivery {
    queue: Arc<MemoryQueue>,
    delivery_tag: u64,
    envelope: Envelope,
    outstanding: Arc<AtomicUsize>,
    settled: bool,
}

impl MemoryDelivery {
    fn settle(&mut self, requeue: bool) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.queue.settle(self.delivery_tag, requeue);
    }
}

impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.envelope.payload
    }

    fn redelivered(&self) -> bool {
        self.envelope.redelivered
    }

    async fn ack(mut self) -> Result<(), NetError> {
        self.settle(false);
        Ok(())
    }

    async fn requeue(mut self) -> Result<(), NetError> {
        self.settle(true);
        Ok(())
    }
}

impl Drop for MemoryDelivery {
    fn drop(&mut self) {
        self.settle(true);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn bound_queue(substrate: &MemorySubstrate, name: &str) {
        substrate
            .declare_queue(name, QueueOptions::durable())
            .await
            .unwrap();
        substrate.bind_queue(name, name).await.unwrap();
    }

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;
        substrate
            .declare_queue("t.1", QueueOptions::durable())
            .await
            .unwrap();
        assert!(substrate.has_queue("t.1"));
    }

    #[tokio::test]
    async fn test_declare_with_other_durability_fails() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;
        let result = substrate
            .declare_queue("t.1", QueueOptions::transient())
            .await;
        assert!(matches!(
            result,
            Err(NetError::QueueMismatch {
                existing_durable: true,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_bind_requires_queue() {
        let substrate = MemorySubstrate::new();
        let result = substrate.bind_queue("missing", "missing").await;
        assert!(matches!(result, Err(NetError::QueueNotFound(_))));
    }

    #[tokio::test]
    async fn test_direct_routing_is_one_to_one() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;
        bound_queue(&substrate, "t.2").await;

        substrate
            .publish_persistent("t.1", b"hello".to_vec())
            .await
            .unwrap();

        assert_eq!(substrate.ready_count("t.1"), Some(1));
        assert_eq!(substrate.ready_count("t.2"), Some(0));
    }

    #[tokio::test]
    async fn test_unrouted_message_dropped() {
        let substrate = MemorySubstrate::new();
        substrate
            .publish_persistent("nobody", b"x".to_vec())
            .await
            .unwrap();
        assert!(!substrate.has_queue("nobody"));
    }

    #[tokio::test]
    async fn test_consume_ack_removes_message() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;
        substrate.publish_persistent("t.1", b"a".to_vec()).await.unwrap();

        let mut consumer = substrate.consume("t.1", 1).await.unwrap();
        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.payload(), b"a");
        assert!(!delivery.redelivered());
        assert_eq!(substrate.unacked_count("t.1"), Some(1));

        delivery.ack().await.unwrap();
        assert_eq!(substrate.unacked_count("t.1"), Some(0));
        assert_eq!(substrate.ready_count("t.1"), Some(0));
    }

    #[tokio::test]
    async fn test_dropped_delivery_is_requeued_first() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;
        substrate.publish_persistent("t.1", b"a".to_vec()).await.unwrap();
        substrate.publish_persistent("t.1", b"b".to_vec()).await.unwrap();

        let mut consumer = substrate.consume("t.1", 1).await.unwrap();
        drop(consumer.next().await.unwrap());

        let again = consumer.next().await.unwrap();
        assert_eq!(again.payload(), b"a");
        assert!(again.redelivered());
    }

    #[tokio::test]
    async fn test_prefetch_blocks_until_ack() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;
        substrate.publish_persistent("t.1", b"a".to_vec()).await.unwrap();
        substrate.publish_persistent("t.1", b"b".to_vec()).await.unwrap();

        let mut consumer = substrate.consume("t.1", 1).await.unwrap();
        let first = consumer.next().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), consumer.next()).await;
        assert!(blocked.is_err());

        first.ack().await.unwrap();
        let second = consumer.next().await.unwrap();
        assert_eq!(second.payload(), b"b");
    }

    #[tokio::test]
    async fn test_waiting_consumer_wakes_on_publish() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;

        let mut consumer = substrate.consume("t.1", 1).await.unwrap();
        let publisher = substrate.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher
                .publish_persistent("t.1", b"late".to_vec())
                .await
                .unwrap();
        });

        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.payload(), b"late");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_queue_removes_bindings_and_wakes_consumers() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;

        let mut consumer = substrate.consume("t.1", 1).await.unwrap();
        let deleter = substrate.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            deleter.delete_queue("t.1").await.unwrap();
        });

        let result = consumer.next().await;
        assert!(matches!(result, Err(NetError::QueueNotFound(_))));
        handle.await.unwrap();

        assert!(!substrate.is_bound("t.1", "t.1"));
        substrate.delete_queue("t.1").await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_consumer_stops() {
        let substrate = MemorySubstrate::new();
        bound_queue(&substrate, "t.1").await;
        let consumer = substrate.consume("t.1", 1).await.unwrap();
        assert!(consumer.tag().starts_with("ctag-"));
        consumer.cancel().await.unwrap();
    }
}
