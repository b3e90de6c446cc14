//! Broker primitives the engine is written against.
//!
//! The engine never talks to a broker client directly. It needs a direct
//! exchange plus durable named queues that can be declared, bound, published
//! to, consumed with a bounded number of unacknowledged messages, and
//! destroyed. [`DeliverySubstrate`] is that surface; [`crate::jetstream`] and
//! [`crate::memory`] implement it.

use std::future::Future;

use crate::error::NetError;

/// Flags a queue is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survive broker and process restarts.
    pub durable: bool,
}

impl QueueOptions {
    /// Options for a durable queue.
    #[must_use]
    pub fn durable() -> Self {
        Self { durable: true }
    }

    /// Options for a queue that may be discarded when idle.
    #[must_use]
    pub fn transient() -> Self {
        Self { durable: false }
    }
}

/// A message handed to a consumer and not yet settled.
///
/// Exactly one of [`Delivery::ack`] or [`Delivery::requeue`] settles it. A
/// delivery that is dropped unsettled goes back to its queue: immediately for
/// [`crate::memory`], and for [`crate::jetstream`] once a background NAK
/// lands, or at the latest after [`crate::jetstream::ACK_WAIT`]. Until then
/// it still counts against the queue's prefetch limit.
pub trait Delivery: Send {
    /// The raw message body.
    fn payload(&self) -> &[u8];

    /// Whether this message was delivered before and returned to the queue.
    fn redelivered(&self) -> bool;

    /// Remove the message from its queue.
    fn ack(self) -> impl Future<Output = Result<(), NetError>> + Send;

    /// Return the message to its queue for another consumer.
    fn requeue(self) -> impl Future<Output = Result<(), NetError>> + Send;
}

/// A consumer registration on one queue.
pub trait Consumer: Send {
    /// Delivery type produced by this consumer.
    type Delivery: Delivery;

    /// Identifier of this registration.
    fn tag(&self) -> &str;

    /// Wait for the next message.
    ///
    /// Suspends while the consumer already holds its maximum number of
    /// unacknowledged deliveries or the queue is empty.
    fn next(&mut self) -> impl Future<Output = Result<Self::Delivery, NetError>> + Send;

    /// End the registration. Deliveries already handed out stay valid and
    /// must still be settled.
    fn cancel(self) -> impl Future<Output = Result<(), NetError>> + Send;
}

/// Exchange and queue operations backing the engine.
///
/// Every method suspends only the calling task. Implementations are shared
/// across tasks by reference.
pub trait DeliverySubstrate: Send + Sync {
    /// Consumer type produced by [`DeliverySubstrate::consume`].
    type Consumer: Consumer;

    /// Declare a queue. Declaring an existing queue with the same options is
    /// a no-op; with different durability it fails with
    /// [`NetError::QueueMismatch`].
    fn declare_queue(
        &self,
        queue: &str,
        options: QueueOptions,
    ) -> impl Future<Output = Result<(), NetError>> + Send;

    /// Bind a declared queue to the exchange under `routing_key`.
    fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
    ) -> impl Future<Output = Result<(), NetError>> + Send;

    /// Publish `payload` to the exchange under `routing_key` in persistent
    /// delivery mode. Messages whose key has no binding are dropped.
    fn publish_persistent(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), NetError>> + Send;

    /// Start consuming `queue` with at most `prefetch` unacknowledged
    /// messages outstanding.
    fn consume(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> impl Future<Output = Result<Self::Consumer, NetError>> + Send;

    /// Destroy a queue and its bindings. Deleting a missing queue succeeds.
    fn delete_queue(&self, queue: &str) -> impl Future<Output = Result<(), NetError>> + Send;
}
