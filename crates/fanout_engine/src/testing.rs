//! Fixtures shared by the engine's unit tests.

use fanout_model::{Filter, Subscription};
use fanout_net::MemorySubstrate;

use crate::config::{EngineConfig, Environment};
use crate::engine::PubSubEngine;
use crate::registry::MemoryRegistry;

pub(crate) type TestEngine = PubSubEngine<MemorySubstrate, MemoryRegistry>;

pub(crate) fn subscription(id: &str, owner: &str, item_type: &str) -> Subscription {
    Subscription::new(id, owner, item_type)
}

pub(crate) fn filtered(
    id: &str,
    owner: &str,
    item_type: &str,
    filter: serde_json::Value,
) -> Subscription {
    Subscription::new(id, owner, item_type).with_filter(Filter::from_document(&filter).unwrap())
}

/// An engine over a fresh in-process broker, plus a handle to that broker.
pub(crate) fn engine(environment: Environment) -> (TestEngine, MemorySubstrate) {
    let substrate = MemorySubstrate::new();
    let config = EngineConfig::new().with_environment(environment);
    (
        PubSubEngine::new(substrate.clone(), MemoryRegistry::new(), config),
        substrate,
    )
}

pub(crate) fn disabled_engine() -> TestEngine {
    PubSubEngine::disabled(MemoryRegistry::new(), EngineConfig::new())
}

/// Register `subscription` with the registry and create its queue.
pub(crate) async fn subscribe(engine: &TestEngine, subscription: &Subscription) {
    engine.registry().insert(subscription.clone());
    engine.create_subscription(subscription.clone()).await.unwrap();
}
