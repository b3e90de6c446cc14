//! Subscription lifecycle — per-subscription queues and staleness.
//!
//! Creating a subscription declares its queue and binds it to the exchange
//! under the queue's own name; removing it destroys the queue, which drops
//! the binding with it. Both are idempotent.

use std::time::{SystemTime, UNIX_EPOCH};

use fanout_model::Subscription;
use fanout_net::routing::queue_name;
use fanout_net::{DeliverySubstrate, QueueOptions};
use tracing::{debug, info};

use crate::engine::PubSubEngine;
use crate::error::EngineError;
use crate::registry::SubscriptionRegistry;

/// Reject subscriptions that cannot name a queue.
pub(crate) fn validate(subscription: &Subscription) -> Result<(), EngineError> {
    if subscription.item_type.is_empty() {
        return Err(EngineError::MissingField("type"));
    }
    if subscription.id.is_empty() {
        return Err(EngineError::MissingField("id"));
    }
    Ok(())
}

pub(crate) fn queue_options(subscription: &Subscription) -> QueueOptions {
    QueueOptions {
        durable: subscription.durable,
    }
}

impl<S: DeliverySubstrate, R: SubscriptionRegistry> PubSubEngine<S, R> {
    /// Declare and bind the subscription's queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingField`] before any I/O if `type` or `id`
    /// is empty, [`EngineError::Disabled`] without a substrate, and
    /// [`EngineError::Net`] if the queue exists with other durability or the
    /// substrate fails.
    pub async fn create_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<Subscription, EngineError> {
        validate(&subscription)?;
        let substrate = self.connected()?;
        let queue = queue_name(&subscription.item_type, &subscription.id);
        debug!(
            queue,
            item_type = subscription.item_type,
            subscription_id = subscription.id,
            filter = %subscription.filter.to_document(),
            "creating subscription"
        );

        substrate
            .declare_queue(&queue, queue_options(&subscription))
            .await?;
        substrate.bind_queue(&queue, &queue).await?;

        self.context().track(&queue, &subscription);
        info!(queue, durable = subscription.durable, "subscription created");
        Ok(subscription)
    }

    /// Destroy the subscription's queue and its binding.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingField`] before any I/O if `type` or `id`
    /// is empty, [`EngineError::Disabled`] without a substrate, and
    /// [`EngineError::Net`] if the substrate fails.
    pub async fn remove_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<(), EngineError> {
        validate(subscription)?;
        let substrate = self.connected()?;
        let queue = queue_name(&subscription.item_type, &subscription.id);

        self.context().untrack(&queue);
        substrate.delete_queue(&queue).await?;
        info!(queue, "subscription removed");
        Ok(())
    }

    /// Subscriptions whose consumer has not been seen since this instant are
    /// stale and may be reaped: now minus four receive timeouts.
    #[must_use]
    pub fn stale_subscription_cutoff(&self) -> SystemTime {
        self.stale_subscription_cutoff_at(SystemTime::now())
    }

    /// [`Self::stale_subscription_cutoff`] relative to `now`.
    #[must_use]
    pub fn stale_subscription_cutoff_at(&self, now: SystemTime) -> SystemTime {
        now.checked_sub(self.config().stale_after())
            .unwrap_or(UNIX_EPOCH)
    }
}
