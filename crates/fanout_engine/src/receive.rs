//! Receive loop — a one-shot pull of a single item.
//!
//! ```text
//! Idle ──declare──▶ Declared ──consume(prefetch 1)──▶ Consuming
//!                                                      │ message
//!                                                      ▼
//!                               Delivered ◀──ack── cancel consumer
//! ```
//!
//! The consumer is cancelled before the message is acknowledged, so a session
//! never holds a second message. If the call is dropped (timeout or caller
//! cancellation) after the message arrived but before the ack, the delivery
//! is released back to the queue. A payload that fails to decode is
//! acknowledged anyway and surfaced as [`EngineError::MalformedPayload`], so a
//! bad message cannot wedge the queue.

use std::time::Duration;

use fanout_model::{Item, Subscription};
use fanout_net::routing::queue_name;
use fanout_net::{Consumer, Delivery, DeliverySubstrate};
use tracing::debug;

use crate::engine::PubSubEngine;
use crate::error::EngineError;
use crate::lifecycle::{queue_options, validate};
use crate::registry::SubscriptionRegistry;

/// Outstanding unacknowledged messages allowed per receive session.
pub const PREFETCH: u16 = 1;

impl<S: DeliverySubstrate, R: SubscriptionRegistry> PubSubEngine<S, R> {
    /// Wait up to the configured receive timeout for one item on
    /// `subscription`'s queue.
    ///
    /// # Errors
    ///
    /// See [`Self::receive_within`].
    pub async fn receive(&self, subscription: &Subscription) -> Result<Item, EngineError> {
        self.receive_within(subscription, self.config().receive_timeout)
            .await
    }

    /// Wait up to `timeout` for one item on `subscription`'s queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingField`] before any I/O if `type` or `id`
    /// is empty, [`EngineError::Disabled`] without a substrate,
    /// [`EngineError::ReceiveTimeout`] if nothing arrives in time,
    /// [`EngineError::MalformedPayload`] if the message cannot be decoded, and
    /// [`EngineError::Net`] if the substrate fails.
    pub async fn receive_within(
        &self,
        subscription: &Subscription,
        timeout: Duration,
    ) -> Result<Item, EngineError> {
        validate(subscription)?;
        let substrate = self.connected()?;

        match tokio::time::timeout(timeout, self.receive_one(substrate, subscription)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(subscription_id = subscription.id, ?timeout, "receive timed out");
                Err(EngineError::ReceiveTimeout(timeout))
            }
        }
    }

    async fn receive_one(
        &self,
        substrate: &S,
        subscription: &Subscription,
    ) -> Result<Item, EngineError> {
        let queue = queue_name(&subscription.item_type, &subscription.id);

        substrate
            .declare_queue(&queue, queue_options(subscription))
            .await?;

        let mut consumer = substrate.consume(&queue, PREFETCH).await?;
        debug!(queue, consumer = consumer.tag(), "consuming");

        let delivery = consumer.next().await?;
        let decoded: Result<Item, _> = fanout_net::decode(delivery.payload());
        debug!(
            queue,
            redelivered = delivery.redelivered(),
            bytes = delivery.payload().len(),
            "received message"
        );

        consumer.cancel().await?;
        delivery.ack().await?;

        decoded.map_err(|source| EngineError::MalformedPayload { queue, source })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fanout_net::{DeliverySubstrate, routing};
    use serde_json::json;

    use super::*;
    use crate::config::Environment;
    use crate::testing::{disabled_engine, engine, filtered, subscribe, subscription};

    fn reading(id: &str, value: i64) -> Item {
        Item::new("temperature", id)
            .visible_to("p1")
            .with("value", value)
            .with("unit", "F")
    }

    #[tokio::test]
    async fn test_publish_then_receive_returns_item() {
        let (engine, substrate) = engine(Environment::Test);
        let sub = subscription("s1", "p1", "temperature");
        subscribe(&engine, &sub).await;

        let item = reading("a", 70);
        engine.publish("temperature", &item).await.unwrap();

        let received = engine.receive(&sub).await.unwrap();
        assert_eq!(received.id, item.id);
        assert_eq!(received.body, item.body);
        assert_eq!(received, item);
        assert_eq!(substrate.ready_count("temperature.s1"), Some(0));
        assert_eq!(substrate.unacked_count("temperature.s1"), Some(0));
    }

    #[tokio::test]
    async fn test_receive_takes_one_item_per_call_in_order() {
        let (engine, substrate) = engine(Environment::Test);
        let sub = subscription("s1", "p1", "temperature");
        subscribe(&engine, &sub).await;

        engine.publish("temperature", &reading("a", 1)).await.unwrap();
        engine.publish("temperature", &reading("b", 2)).await.unwrap();

        assert_eq!(engine.receive(&sub).await.unwrap().id, "a");
        assert_eq!(substrate.ready_count("temperature.s1"), Some(1));
        assert_eq!(engine.receive(&sub).await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_concurrent_receives_get_distinct_items() {
        let (engine, _) = engine(Environment::Test);
        let engine = Arc::new(engine);
        let sub = subscription("s1", "p1", "temperature");
        subscribe(&engine, &sub).await;

        engine.publish("temperature", &reading("a", 1)).await.unwrap();
        engine.publish("temperature", &reading("b", 2)).await.unwrap();

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            let sub = sub.clone();
            async move { engine.receive(&sub).await }
        });
        let second = tokio::spawn({
            let engine = Arc::clone(&engine);
            let sub = sub.clone();
            async move { engine.receive(&sub).await }
        });

        let mut ids = vec![
            first.await.unwrap().unwrap().id,
            second.await.unwrap().unwrap().id,
        ];
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let (engine, _) = engine(Environment::Test);
        let engine = Arc::new(engine);
        let sub = subscription("s1", "p1", "temperature");
        subscribe(&engine, &sub).await;

        let waiting = tokio::spawn({
            let engine = Arc::clone(&engine);
            let sub = sub.clone();
            async move { engine.receive(&sub).await }
        });
        tokio::task::yield_now().await;

        engine.publish("temperature", &reading("late", 1)).await.unwrap();
        assert_eq!(waiting.await.unwrap().unwrap().id, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_on_empty_queue() {
        let (engine, _) = engine(Environment::Test);
        let sub = subscription("s1", "p1", "temperature");
        subscribe(&engine, &sub).await;

        let result = engine.receive(&sub).await;
        assert!(matches!(
            result,
            Err(EngineError::ReceiveTimeout(t)) if t == Duration::from_secs(300)
        ));
    }

    #[tokio::test]
    async fn test_timed_out_receive_leaves_later_items_queued() {
        let (engine, substrate) = engine(Environment::Test);
        let sub = subscription("s1", "p1", "temperature");
        subscribe(&engine, &sub).await;

        let result = engine.receive_within(&sub, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(EngineError::ReceiveTimeout(_))));

        engine.publish("temperature", &reading("a", 1)).await.unwrap();
        assert_eq!(substrate.ready_count("temperature.s1"), Some(1));
        assert_eq!(engine.receive(&sub).await.unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_removed_subscription_gets_no_stale_items() {
        let (engine, substrate) = engine(Environment::Test);
        let sub = filtered("s1", "p1", "temperature", json!({ "value": { "$gt": 0 } }));
        subscribe(&engine, &sub).await;

        engine.publish("temperature", &reading("before", 1)).await.unwrap();
        engine.remove_subscription(&sub).await.unwrap();
        engine.publish("temperature", &reading("between", 2)).await.unwrap();

        engine.create_subscription(sub.clone()).await.unwrap();
        assert_eq!(substrate.ready_count("temperature.s1"), Some(0));

        engine.publish("temperature", &reading("after", 3)).await.unwrap();
        assert_eq!(engine.receive(&sub).await.unwrap().id, "after");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acked_and_surfaced() {
        let (engine, substrate) = engine(Environment::Test);
        let sub = subscription("s1", "p1", "temperature");
        subscribe(&engine, &sub).await;

        let queue = routing::queue_name("temperature", "s1");
        substrate
            .publish_persistent(&queue, vec![0xc1])
            .await
            .unwrap();

        let result = engine.receive(&sub).await;
        assert!(matches!(result, Err(EngineError::MalformedPayload { .. })));
        assert_eq!(substrate.ready_count(&queue), Some(0));
        assert_eq!(substrate.unacked_count(&queue), Some(0));
    }

    #[tokio::test]
    async fn test_receive_declares_missing_queue() {
        let (engine, substrate) = engine(Environment::Test);
        let sub = subscription("s1", "p1", "temperature");

        let result = engine.receive_within(&sub, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(EngineError::ReceiveTimeout(_))));
        assert!(substrate.has_queue("temperature.s1"));
    }

    #[tokio::test]
    async fn test_missing_fields_rejected_before_io() {
        let engine = disabled_engine();
        let result = engine.receive(&subscription("s1", "p1", "")).await;
        assert!(matches!(result, Err(EngineError::MissingField("type"))));
        let result = engine.receive(&subscription("", "p1", "temperature")).await;
        assert!(matches!(result, Err(EngineError::MissingField("id"))));
    }
}
