//! Published items and the principals they are visible to.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a principal (user, device, service, ...).
///
/// Principals own subscriptions and appear in an item's `visible_to` set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    /// Create a principal identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrincipalId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A published record.
///
/// `id`, `type` and `visible_to` are the fields the engine itself reads; every
/// other field is carried in [`Item::body`] and flattened into the same
/// document on the wire, so filters address them as top-level fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Producer-assigned identifier.
    pub id: String,
    /// Type tag used for routing and subscription type matching.
    #[serde(rename = "type")]
    pub item_type: String,
    /// Principals allowed to see this item.
    #[serde(default)]
    pub visible_to: Vec<PrincipalId>,
    /// Remaining payload fields.
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Item {
    /// Create an item with an empty body and no visibility.
    #[must_use]
    pub fn new(item_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_type: item_type.into(),
            visible_to: Vec::new(),
            body: Map::new(),
        }
    }

    /// Make the item visible to a principal.
    #[must_use]
    pub fn visible_to(mut self, principal: impl Into<PrincipalId>) -> Self {
        self.visible_to.push(principal.into());
        self
    }

    /// Set a body field.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(field.into(), value.into());
        self
    }

    /// The document form of the item that filters are evaluated against.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut doc = self.body.clone();
        doc.insert("id".to_string(), Value::String(self.id.clone()));
        doc.insert("type".to_string(), Value::String(self.item_type.clone()));
        doc.insert(
            "visible_to".to_string(),
            Value::Array(
                self.visible_to
                    .iter()
                    .map(|p| Value::String(p.as_str().to_string()))
                    .collect(),
            ),
        );
        Value::Object(doc)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_builder_and_document() {
        let item = Item::new("temperature", "t-1")
            .visible_to("p1")
            .with("value", 70);
        let doc = item.to_document();
        assert_eq!(doc["type"], "temperature");
        assert_eq!(doc["id"], "t-1");
        assert_eq!(doc["value"], 70);
        assert_eq!(doc["visible_to"], json!(["p1"]));
    }

    #[test]
    fn test_deserialize_flattens_body() {
        let item: Item = serde_json::from_value(json!({
            "type": "temperature",
            "id": "t-2",
            "value": 30,
            "visible_to": ["p1", "p2"]
        }))
        .unwrap();
        assert_eq!(item.item_type, "temperature");
        assert_eq!(item.visible_to.len(), 2);
        assert_eq!(item.body.get("value"), Some(&json!(30)));
        assert!(!item.body.contains_key("type"));
    }

    #[test]
    fn test_missing_visibility_defaults_to_empty() {
        let item: Item = serde_json::from_value(json!({"type": "ping", "id": "x"})).unwrap();
        assert!(item.visible_to.is_empty());
    }
}
