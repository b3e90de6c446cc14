//! Subscriptions — a principal's standing interest in one item type.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::Filter;
use crate::item::{Item, PrincipalId};

/// A standing registration by a principal to receive matching items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub id: String,
    /// The principal that owns this subscription.
    pub owner: PrincipalId,
    /// Items must carry exactly this type to be eligible.
    #[serde(rename = "type")]
    pub item_type: String,
    /// Predicate an eligible item must satisfy.
    #[serde(default)]
    pub filter: Filter,
    /// Whether the subscription's queue must survive restarts.
    #[serde(default = "default_durable")]
    pub durable: bool,
    /// Optional human-readable name, used only in logs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_durable() -> bool {
    true
}

impl Subscription {
    /// Create a durable subscription that matches every item of `item_type`.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<PrincipalId>,
        item_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            item_type: item_type.into(),
            filter: Filter::All,
            durable: true,
            name: None,
        }
    }

    /// Set the filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Set durability.
    #[must_use]
    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether `item`, published under `item_type`, should be delivered here.
    ///
    /// Visibility is not checked; callers narrow by owner first.
    #[must_use]
    pub fn accepts(&self, item_type: &str, item: &Item) -> bool {
        self.accepts_document(item_type, &item.to_document())
    }

    /// [`Self::accepts`] against an item already rendered with
    /// [`Item::to_document`]. The type is checked before the filter runs.
    #[must_use]
    pub fn accepts_document(&self, item_type: &str, document: &Value) -> bool {
        self.item_type == item_type && self.filter.matches(document)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_defaults_when_deserialised() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "s1",
            "owner": "p1",
            "type": "temperature"
        }))
        .unwrap();
        assert!(sub.durable);
        assert_eq!(sub.filter, Filter::All);
    }

    #[test]
    fn test_filter_parsed_from_document() {
        let sub: Subscription = serde_json::from_value(json!({
            "id": "s1",
            "owner": "p1",
            "type": "temperature",
            "filter": { "value": { "$gt": 50 } }
        }))
        .unwrap();
        let hot = Item::new("temperature", "a").with("value", 70);
        let cold = Item::new("temperature", "b").with("value", 30);
        assert!(sub.accepts("temperature", &hot));
        assert!(!sub.accepts("temperature", &cold));
        assert!(!sub.accepts("humidity", &hot));
        assert!(sub.accepts_document("temperature", &hot.to_document()));
        assert!(!sub.accepts_document("humidity", &hot.to_document()));
    }

    #[test]
    fn test_invalid_filter_rejected() {
        let result: Result<Subscription, _> = serde_json::from_value(json!({
            "id": "s1",
            "owner": "p1",
            "type": "temperature",
            "filter": { "value": { "$between": [1, 2] } }
        }));
        assert!(result.is_err());
    }
}
