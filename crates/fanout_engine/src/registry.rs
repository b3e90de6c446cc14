//! Subscription registry — where the engine looks up who wants what.
//!
//! The engine only reads subscriptions; creating and persisting the records
//! belongs to the owning service. [`MemoryRegistry`] is a process-local
//! implementation for embedding and tests.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use fanout_model::{PrincipalId, Subscription};

/// Errors returned by a registry lookup.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// The lookup itself failed.
    #[error("subscription lookup failed: {0}")]
    Lookup(String),

    /// The backing store cannot be reached.
    #[error("subscription store unavailable")]
    Unavailable,
}

/// Read access to subscription records.
pub trait SubscriptionRegistry: Send + Sync {
    /// Subscriptions owned by `owner`.
    fn subscriptions_owned_by(
        &self,
        owner: &PrincipalId,
    ) -> impl Future<Output = Result<Vec<Subscription>, RegistryError>> + Send;

    /// Every subscription the registry knows about.
    fn active_subscriptions(
        &self,
    ) -> impl Future<Output = Result<Vec<Subscription>, RegistryError>> + Send;
}

impl<R: SubscriptionRegistry> SubscriptionRegistry for Arc<R> {
    fn subscriptions_owned_by(
        &self,
        owner: &PrincipalId,
    ) -> impl Future<Output = Result<Vec<Subscription>, RegistryError>> + Send {
        (**self).subscriptions_owned_by(owner)
    }

    fn active_subscriptions(
        &self,
    ) -> impl Future<Output = Result<Vec<Subscription>, RegistryError>> + Send {
        (**self).active_subscriptions()
    }
}

/// Subscriptions held in process memory, indexed by owner.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    by_owner: DashMap<PrincipalId, Vec<Subscription>>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of subscriptions.
    #[must_use]
    pub fn from_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let registry = Self::new();
        for subscription in subscriptions {
            registry.insert(subscription);
        }
        registry
    }

    /// Add or replace a subscription (matched by owner and id).
    pub fn insert(&self, subscription: Subscription) {
        let mut owned = self.by_owner.entry(subscription.owner.clone()).or_default();
        owned.retain(|s| s.id != subscription.id);
        owned.push(subscription);
    }

    /// Remove a subscription. Returns it if it was present.
    pub fn remove(&self, owner: &PrincipalId, id: &str) -> Option<Subscription> {
        let mut owned = self.by_owner.get_mut(owner)?;
        let index = owned.iter().position(|s| s.id == id)?;
        Some(owned.remove(index))
    }

    /// Total number of subscriptions held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_owner.iter().map(|entry| entry.value().len()).sum()
    }

    /// Whether the registry holds no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SubscriptionRegistry for MemoryRegistry {
    async fn subscriptions_owned_by(
        &self,
        owner: &PrincipalId,
    ) -> Result<Vec<Subscription>, RegistryError> {
        Ok(self
            .by_owner
            .get(owner)
            .map(|owned| owned.value().clone())
            .unwrap_or_default())
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>, RegistryError> {
        let mut all: Vec<Subscription> = self
            .by_owner
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_by_owner() {
        let registry = MemoryRegistry::from_subscriptions([
            Subscription::new("s1", "p1", "temperature"),
            Subscription::new("s2", "p1", "humidity"),
            Subscription::new("s3", "p2", "temperature"),
        ]);

        let owned = registry
            .subscriptions_owned_by(&PrincipalId::new("p1"))
            .await
            .unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|s| s.owner.as_str() == "p1"));

        let none = registry
            .subscriptions_owned_by(&PrincipalId::new("p9"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_insert_replaces_same_id() {
        let registry = MemoryRegistry::new();
        registry.insert(Subscription::new("s1", "p1", "temperature"));
        registry.insert(Subscription::new("s1", "p1", "temperature").with_name("renamed"));
        assert_eq!(registry.len(), 1);

        let all = registry.active_subscriptions().await.unwrap();
        assert_eq!(all[0].name.as_deref(), Some("renamed"));
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = MemoryRegistry::from_subscriptions([Subscription::new("s1", "p1", "t")]);
        let owner = PrincipalId::new("p1");
        assert!(registry.remove(&owner, "s1").is_some());
        assert!(registry.remove(&owner, "s1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_shared_through_arc() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(Subscription::new("s1", "p1", "t"));
        let all = SubscriptionRegistry::active_subscriptions(&registry).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
