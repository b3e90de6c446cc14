//! # fanout_engine
//!
//! Selective publish/subscribe fan-out and delivery.
//!
//! Producers publish typed items carrying a visibility set; principals own
//! filtered subscriptions. For every published item the engine:
//!
//! 1. Narrows candidates to subscriptions owned by principals the item is
//!    visible to (via a [`SubscriptionRegistry`]).
//! 2. Skips subscriptions of a different type.
//! 3. Evaluates each remaining subscription's filter against the item.
//! 4. Publishes the item persistently under the routing key owned by each
//!    matching subscription.
//!
//! Consumers pull one item at a time from their subscription's queue with
//! [`PubSubEngine::receive`], which acknowledges the message before returning.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fanout_engine::{EngineConfig, MemoryRegistry, PubSubEngine};
//! use fanout_model::{Item, Subscription};
//! use fanout_net::JetStreamSubstrate;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = MemoryRegistry::new();
//!     let subscription = Subscription::new("s-1", "p-1", "temperature");
//!     registry.insert(subscription.clone());
//!
//!     let config = EngineConfig::from_env();
//!     let engine = PubSubEngine::<JetStreamSubstrate, _>::connect(config, registry).await;
//!     // engine.create_subscription(subscription.clone()).await?;
//!     // engine.publish("temperature", &Item::new("temperature", "i-1").visible_to("p-1")).await?;
//!     // let item = engine.receive(&subscription).await?;
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod publisher;
pub mod receive;
pub mod registry;

pub use config::{EngineConfig, Environment};
pub use context::EngineContext;
pub use engine::PubSubEngine;
pub use error::EngineError;
pub use publisher::PublishReport;
pub use registry::{MemoryRegistry, RegistryError, SubscriptionRegistry};

#[cfg(test)]
pub(crate) mod testing;
