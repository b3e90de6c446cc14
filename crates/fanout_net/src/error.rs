//! Substrate-layer error types.

/// Errors that can occur while talking to the delivery substrate.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a payload to MessagePack.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Failed to decode a payload from MessagePack.
    #[error("failed to decode payload: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// Any other broker-side failure (stream, consumer, publish, ack).
    #[error("NATS error: {0}")]
    Nats(String),

    /// A queue was re-declared with different durability.
    #[error("queue {queue} already exists with durable={existing_durable}")]
    QueueMismatch {
        /// The queue name.
        queue: String,
        /// Durability of the existing queue.
        existing_durable: bool,
    },

    /// The named queue has not been declared (or was deleted).
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// `next` was called on a cancelled consumer.
    #[error("consumer {0} was cancelled")]
    ConsumerCancelled(String),
}

impl NetError {
    /// Wrap a broker error that has no dedicated variant.
    pub(crate) fn nats(err: impl std::fmt::Display) -> Self {
        NetError::Nats(err.to_string())
    }
}
