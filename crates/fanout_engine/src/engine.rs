//! The engine facade: owns the substrate handle, the registry, and the
//! context, and degrades to a disabled no-op when no substrate is available.

use fanout_model::Subscription;
use fanout_net::{DeliverySubstrate, JetStreamSubstrate};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::EngineError;
use crate::registry::SubscriptionRegistry;

/// Selective publish/subscribe engine.
///
/// Operations are split across modules:
///
/// - [`lifecycle`](crate::lifecycle) — create and remove subscriptions.
/// - [`publisher`](crate::publisher) — fan an item out to matching queues.
/// - [`receive`](crate::receive) — pull a single item from a queue.
///
/// Each operation touches only the queues it names, so the engine is shared
/// between tasks by reference (or `Arc`) without locking.
#[derive(Debug)]
pub struct PubSubEngine<S, R> {
    /// `None` when the engine is disabled.
    substrate: Option<S>,
    registry: R,
    config: EngineConfig,
    context: EngineContext,
}

impl<S: DeliverySubstrate, R: SubscriptionRegistry> PubSubEngine<S, R> {
    /// Create an engine over a connected substrate.
    #[must_use]
    pub fn new(substrate: S, registry: R, config: EngineConfig) -> Self {
        let context = EngineContext::new(config.environment);
        Self {
            substrate: Some(substrate),
            registry,
            config,
            context,
        }
    }

    /// Create an engine with no substrate. Every operation that needs the
    /// substrate fails with [`EngineError::Disabled`].
    #[must_use]
    pub fn disabled(registry: R, config: EngineConfig) -> Self {
        let context = EngineContext::new(config.environment);
        Self {
            substrate: None,
            registry,
            config,
            context,
        }
    }

    /// Whether a substrate is connected.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.substrate.is_some()
    }

    /// Returns the substrate, if connected.
    #[must_use]
    pub fn substrate(&self) -> Option<&S> {
        self.substrate.as_ref()
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the context.
    #[must_use]
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub(crate) fn connected(&self) -> Result<&S, EngineError> {
        self.substrate.as_ref().ok_or(EngineError::Disabled)
    }

    /// Clear the introspection index. Does nothing in production.
    pub fn reset_for_test(&self) {
        if self.context.environment().is_production() {
            return;
        }
        tracing::debug!("resetting tracked subscriptions");
        self.context.reset();
    }

    /// Subscriptions created through this engine whose queue name starts with
    /// `prefix`. Empty in production.
    #[must_use]
    pub fn tracked_subscriptions(&self, prefix: &str) -> Vec<Subscription> {
        self.context.tracked(prefix)
    }

    /// Every subscription known to the registry.
    ///
    /// # Errors
    ///
    /// Returns the registry's error if the listing fails.
    pub async fn active_subscriptions(&self) -> Result<Vec<Subscription>, crate::RegistryError> {
        self.registry.active_subscriptions().await
    }
}

impl<R: SubscriptionRegistry> PubSubEngine<JetStreamSubstrate, R> {
    /// Connect to the substrate named in `config`.
    ///
    /// Never fails: when no URL is configured, or the connection cannot be
    /// established, a warning is logged and a disabled engine is returned.
    pub async fn connect(config: EngineConfig, registry: R) -> Self {
        let Some(url) = config.url.clone() else {
            warn!("delivery substrate not configured; set NATS_URL to enable the pub/sub engine");
            return Self::disabled(registry, config);
        };

        match JetStreamSubstrate::connect(&url, &config.exchange).await {
            Ok(substrate) => {
                info!(url, exchange = config.exchange, "pub/sub engine enabled");
                let substrate = substrate.with_inactive_threshold(config.stale_after());
                Self::new(substrate, registry, config)
            }
            Err(err) => {
                warn!(%err, url, "delivery substrate unavailable; pub/sub engine disabled");
                Self::disabled(registry, config)
            }
        }
    }

    /// Flush and release the substrate connection.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Net`] if the final flush fails.
    pub async fn close(self) -> Result<(), EngineError> {
        if let Some(substrate) = self.substrate {
            substrate.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fanout_model::Item;

    use super::*;
    use crate::config::Environment;
    use crate::testing::{disabled_engine, engine, subscription};

    #[tokio::test]
    async fn test_missing_url_disables_engine() {
        let engine = PubSubEngine::<JetStreamSubstrate, _>::connect(
            EngineConfig::new(),
            crate::MemoryRegistry::new(),
        )
        .await;
        assert!(!engine.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_engine_fails_fast() {
        let engine = disabled_engine();
        let sub = subscription("s1", "p1", "temperature");

        assert!(matches!(
            engine.create_subscription(sub.clone()).await,
            Err(EngineError::Disabled)
        ));
        assert!(matches!(
            engine.publish("temperature", &Item::new("temperature", "i")).await,
            Err(EngineError::Disabled)
        ));
        assert!(matches!(engine.receive(&sub).await, Err(EngineError::Disabled)));
        assert!(matches!(
            engine.remove_subscription(&sub).await,
            Err(EngineError::Disabled)
        ));
    }

    #[tokio::test]
    async fn test_reset_for_test_clears_index() {
        let (engine, _) = engine(Environment::Test);
        engine
            .create_subscription(subscription("s1", "p1", "temperature"))
            .await
            .unwrap();
        assert_eq!(engine.tracked_subscriptions("").len(), 1);

        engine.reset_for_test();
        assert!(engine.tracked_subscriptions("").is_empty());
    }

    #[tokio::test]
    async fn test_active_subscriptions_come_from_registry() {
        let (engine, _) = engine(Environment::Production);
        engine.registry().insert(subscription("s1", "p1", "temperature"));
        engine.registry().insert(subscription("s2", "p2", "humidity"));

        let active = engine.active_subscriptions().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(engine.tracked_subscriptions("").is_empty());
    }
}
