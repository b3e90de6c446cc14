//! MessagePack codec helpers.
//!
//! Thin wrappers around `rmp-serde` for encoding and decoding queued
//! payloads. Structs are encoded with field names so that flattened item
//! bodies survive the round trip.

use serde::{Deserialize, Serialize};

use crate::error::NetError;

/// Encode a value to MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec_named(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

#[cfg(test)]
mod tests {
    use fanout_model::Item;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_item_body_survives_encoding() {
        let item = Item::new("temperature", "t-1")
            .visible_to("p1")
            .with("value", 70)
            .with("location", json!({ "city": "Seattle", "floor": 3 }));
        let bytes = encode(&item).unwrap();
        let restored: Item = decode(&bytes).unwrap();
        assert_eq!(item, restored);
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let result: Result<Item, _> = decode(&[0xFF, 0xFF]);
        assert!(matches!(result, Err(NetError::Decode(_))));
    }
}
