//! Engine context — deployment mode and the introspection index.
//!
//! Outside production the engine records every subscription it creates,
//! keyed by queue name, so tests and operators can list them. The index is
//! never consulted when routing; the registry stays the source of truth.

use dashmap::DashMap;
use fanout_model::Subscription;

use crate::config::Environment;

/// Per-engine state that depends on the deployment environment.
#[derive(Debug)]
pub struct EngineContext {
    environment: Environment,
    /// Queue name → subscription. `None` in production.
    tracked: Option<DashMap<String, Subscription>>,
}

impl EngineContext {
    /// Create a context for `environment`.
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            tracked: (!environment.is_production()).then(DashMap::new),
        }
    }

    /// Returns the deployment environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Whether the introspection index is kept.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracked.is_some()
    }

    /// Record a created subscription.
    pub fn track(&self, queue: &str, subscription: &Subscription) {
        if let Some(tracked) = &self.tracked {
            tracked.insert(queue.to_string(), subscription.clone());
        }
    }

    /// Forget a removed subscription.
    pub fn untrack(&self, queue: &str) {
        if let Some(tracked) = &self.tracked {
            tracked.remove(queue);
        }
    }

    /// Drop every tracked subscription.
    pub fn reset(&self) {
        if let Some(tracked) = &self.tracked {
            tracked.clear();
        }
    }

    /// Tracked subscriptions whose queue name starts with `prefix`, ordered
    /// by queue name. Always empty in production.
    #[must_use]
    pub fn tracked(&self, prefix: &str) -> Vec<Subscription> {
        let Some(tracked) = &self.tracked else {
            return Vec::new();
        };
        let mut entries: Vec<(String, Subscription)> = tracked
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, sub)| sub).collect()
    }
}
