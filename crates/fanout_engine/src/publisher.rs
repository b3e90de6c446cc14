//! Fan-out publisher.
//!
//! Candidates are narrowed by visibility first: only subscriptions owned by a
//! principal in the item's `visible_to` set are fetched, then cheap type
//! checks run before the filter is evaluated. Every deduplicated visibility
//! target is processed concurrently.
//!
//! Fan-out is best-effort across targets. A failed registry lookup for one
//! principal does not stop delivery to the others and nothing already
//! delivered is rolled back; the failures are reported together as
//! [`EngineError::PartialFanOut`] once every target has been processed. A
//! substrate failure is returned as soon as all targets finish.

use std::collections::HashSet;

use fanout_model::{Item, PrincipalId};
use fanout_net::routing::queue_name;
use fanout_net::{DeliverySubstrate, NetError};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::engine::PubSubEngine;
use crate::error::EngineError;
use crate::registry::{RegistryError, SubscriptionRegistry};

/// Outcome of a successful [`PubSubEngine::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PublishReport {
    /// Distinct principals the item was visible to.
    pub targets: usize,
    /// Subscriptions the item was delivered to.
    pub delivered: usize,
}

enum TargetError {
    Lookup(RegistryError),
    Net(NetError),
}

/// Distinct principals, in first-seen order.
fn distinct_targets(visible_to: &[PrincipalId]) -> Vec<PrincipalId> {
    let mut seen = HashSet::with_capacity(visible_to.len());
    visible_to
        .iter()
        .filter(|p| seen.insert(*p))
        .cloned()
        .collect()
}

impl<S: DeliverySubstrate, R: SubscriptionRegistry> PubSubEngine<S, R> {
    /// Deliver `item` to every matching subscription.
    ///
    /// A subscription receives the item if and only if its type equals
    /// `item_type`, its owner is in `item.visible_to`, and its filter matches
    /// the item.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Disabled`] without a substrate,
    /// [`EngineError::Net`] if encoding or a publish fails, and
    /// [`EngineError::PartialFanOut`] if any registry lookup failed.
    pub async fn publish(
        &self,
        item_type: &str,
        item: &Item,
    ) -> Result<PublishReport, EngineError> {
        let substrate = self.connected()?;
        debug!(item_type, item_id = item.id, "publishing item");

        let payload = fanout_net::encode(item)?;
        let document = item.to_document();
        let targets = distinct_targets(&item.visible_to);

        let outcomes = join_all(targets.iter().map(|principal| {
            self.deliver_to_owner(substrate, principal, item_type, &document, &payload)
        }))
        .await;

        let mut report = PublishReport {
            targets: targets.len(),
            delivered: 0,
        };
        let mut failures = Vec::new();
        let mut net_error = None;
        for (principal, outcome) in targets.into_iter().zip(outcomes) {
            match outcome {
                Ok(delivered) => report.delivered += delivered,
                Err(TargetError::Lookup(err)) => failures.push((principal, err)),
                Err(TargetError::Net(err)) => {
                    net_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = net_error {
            return Err(err.into());
        }
        if !failures.is_empty() {
            warn!(
                item_id = item.id,
                failed = failures.len(),
                targets = report.targets,
                delivered = report.delivered,
                "subscription lookup failed for some visibility targets"
            );
            return Err(EngineError::PartialFanOut {
                targets: report.targets,
                delivered: report.delivered,
                failures,
            });
        }

        debug!(
            item_id = item.id,
            targets = report.targets,
            delivered = report.delivered,
            "item published"
        );
        Ok(report)
    }

    async fn deliver_to_owner(
        &self,
        substrate: &S,
        owner: &PrincipalId,
        item_type: &str,
        document: &Value,
        payload: &[u8],
    ) -> Result<usize, TargetError> {
        let subscriptions = self
            .registry()
            .subscriptions_owned_by(owner)
            .await
            .map_err(TargetError::Lookup)?;

        let mut delivered = 0;
        for subscription in &subscriptions {
            debug!(
                subscription_id = subscription.id,
                name = subscription.name.as_deref().unwrap_or(""),
                item_type = subscription.item_type,
                "checking subscription"
            );
            if subscription.owner != *owner || !subscription.accepts_document(item_type, document) {
                continue;
            }

            let routing_key = queue_name(&subscription.item_type, &subscription.id);
            debug!(subscription_id = subscription.id, routing_key, "matched subscription");
            substrate
                .publish_persistent(&routing_key, payload.to_vec())
                .await
                .map_err(TargetError::Net)?;
            delivered += 1;
        }
        Ok(delivered)
    }
}
