//! Engine error types.

use std::time::Duration;

use fanout_model::PrincipalId;
use fanout_net::NetError;

use crate::registry::RegistryError;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No delivery substrate is configured or reachable.
    #[error("pub/sub engine is disabled: no delivery substrate connected")]
    Disabled,

    /// A subscription field needed to name its queue is empty.
    #[error("subscription {0} required")]
    MissingField(&'static str),

    /// Substrate failure (declare, bind, publish, consume, ack).
    #[error(transparent)]
    Net(#[from] NetError),

    /// Subscription lookup failed for some visibility targets. Every other
    /// target was still processed and its deliveries stand.
    #[error(
        "fan-out incomplete: lookup failed for {failed} of {targets} visibility targets",
        failed = .failures.len()
    )]
    PartialFanOut {
        /// Number of deduplicated visibility targets.
        targets: usize,
        /// Deliveries made to the targets that succeeded.
        delivered: usize,
        /// Principals whose lookup failed, with the cause.
        failures: Vec<(PrincipalId, RegistryError)>,
    },

    /// No message arrived before the receive timeout.
    #[error("no message received within {0:?}")]
    ReceiveTimeout(Duration),

    /// A queued payload could not be decoded. The message was acknowledged
    /// and is gone from the queue.
    #[error("malformed payload on queue {queue}: {source}")]
    MalformedPayload {
        /// The queue the message came from.
        queue: String,
        /// The decode failure.
        #[source]
        source: NetError,
    },
}
