//! Canonical payload encoder
//!
//! A [`PayloadEncoder`] owns one event's fields plus a private
//! [`MetadataStore`]. Field names stay exactly as the collaborator wrote them
//! until [`PayloadEncoder::build`], which snake-cases every key and wraps the
//! event in the wire envelope:
//!
//! ```text
//! { <metadata groups...>, "events": [ { <event fields...> } ] }
//! ```
//!
//! [`PayloadEncoder::encode`] serializes that object to JSON text and, when
//! binary encoding is on, base64-encodes it.
//!
//! The encoder is also the pre-encoding record persisted by the delivery
//! queue, so it round-trips through serde.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::metadata::{json_kind, MetadataNode, MetadataStore};
use crate::util::{base64_encode, sanitize_property_names, to_snake_case};

/// Key of the event array in the wire envelope
pub const EVENTS_KEY: &str = "events";

fn default_true() -> bool {
    true
}

/// Builds and encodes the wire payload for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayloadEncoder {
    /// Event fields in insertion order
    #[serde(default)]
    data: Map<String, Value>,

    /// Private metadata overlay
    #[serde(default)]
    metadata: MetadataStore,

    /// Whether `encode` base64-encodes the JSON text
    #[serde(default = "default_true")]
    base64: bool,
}

impl Default for PayloadEncoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl PayloadEncoder {
    /// Create an encoder; `base64` selects binary encoding of `encode` output
    pub fn new(base64: bool) -> Self {
        Self {
            data: Map::new(),
            metadata: MetadataStore::new(),
            base64,
        }
    }

    /// Set a field. Null and empty-string values are ignored.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let value = value.into();
        match &value {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            _ => {
                self.data.insert(key.into(), value);
            }
        }
    }

    /// Delete a field, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// `add` every member of `dict`
    pub fn copy_dict(&mut self, dict: &Map<String, Value>) {
        for (key, value) in dict {
            self.add(key.clone(), value.clone());
        }
    }

    /// Deep-merge a metadata tree into this payload's overlay
    pub fn merge_metadata(&mut self, tree: &MetadataNode) {
        self.metadata.merge(tree);
    }

    /// Deep-merge arbitrary JSON metadata; non-objects are ignored
    pub fn merge_metadata_value(&mut self, value: Value) {
        self.metadata.merge_value(value);
    }

    /// Deep-merge the current tree of another store
    pub fn merge_metadata_collection(&mut self, store: &MetadataStore) {
        self.metadata.merge(store.collect());
    }

    /// Replace the overlay with `tree`
    pub fn reset_metadata(&mut self, tree: MetadataNode) {
        self.metadata.reset(tree);
    }

    /// Read a field as it was added
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// All fields as they were added
    pub fn fields(&self) -> &Map<String, Value> {
        &self.data
    }

    /// The metadata overlay
    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Whether `encode` produces base64
    pub fn is_base64(&self) -> bool {
        self.base64
    }

    /// Toggle base64 output
    pub fn set_base64(&mut self, enabled: bool) {
        self.base64 = enabled;
    }

    /// Build the canonical wire object
    pub fn build(&self) -> Value {
        let mut event = sanitize_property_names(&self.data);
        if let Some(Value::String(event_type)) = event.get_mut("type") {
            *event_type = to_snake_case(event_type);
        }

        let mut built = self.metadata.collect().to_snake_cased_map();
        built.insert(
            EVENTS_KEY.to_string(),
            Value::Array(vec![Value::Object(event)]),
        );
        Value::Object(built)
    }

    /// Serialize `build()` to JSON text, base64-encoded when enabled
    pub fn encode(&self) -> CoreResult<String> {
        let text = serde_json::to_string(&self.build())?;
        if self.base64 {
            Ok(base64_encode(&text))
        } else {
            Ok(text)
        }
    }

    /// Rebuild a persisted record; fails unless `value` is a non-empty object
    pub fn from_persisted(value: Value) -> CoreResult<Self> {
        match &value {
            Value::Object(map) if !map.is_empty() => {}
            Value::Object(_) => {
                return Err(CoreError::InvalidPayload {
                    reason: "empty object".to_string(),
                })
            }
            other => {
                return Err(CoreError::InvalidPayload {
                    reason: format!("expected an object, got {}", json_kind(other)),
                })
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The record in its persisted (pre-encoding) form
    pub fn to_persisted(&self) -> CoreResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_add_ignores_null_and_empty_string() {
        let mut pb = PayloadEncoder::new(false);
        pb.add("e", Value::Null);
        pb.add("f", "");
        pb.add("g", Option::<String>::None);
        assert!(pb.fields().is_empty());
        assert_eq!(pb.build(), json!({"events": [{}]}));
    }

    #[test]
    fn test_add_keeps_falsy_non_empty_values() {
        let mut pb = PayloadEncoder::new(false);
        pb.add("zero", 0);
        pb.add("no", false);
        assert_eq!(pb.get("zero"), Some(&json!(0)));
        assert_eq!(pb.get("no"), Some(&json!(false)));
    }

    #[test]
    fn test_type_value_is_snake_cased_only_when_string() {
        let mut pb = PayloadEncoder::new(false);
        pb.add("type", 7);
        assert_eq!(pb.build(), json!({"events": [{"type": 7}]}));
    }

    #[test]
    fn test_persisted_round_trip_keeps_raw_keys() {
        let mut pb = PayloadEncoder::new(false);
        pb.add("eventId", "abc");
        pb.merge_metadata_value(json!({"userInfo": {"userName": "x"}}));

        let persisted = pb.to_persisted().unwrap();
        assert_eq!(persisted["data"]["eventId"], json!("abc"));
        assert_eq!(persisted["metadata"]["userInfo"]["userName"], json!("x"));

        let restored = PayloadEncoder::from_persisted(persisted).unwrap();
        assert_eq!(restored, pb);
    }

    #[test]
    fn test_from_persisted_rejects_bad_shapes() {
        assert!(PayloadEncoder::from_persisted(json!({})).is_err());
        assert!(PayloadEncoder::from_persisted(json!(null)).is_err());
        assert!(PayloadEncoder::from_persisted(json!([1, 2])).is_err());
        assert!(PayloadEncoder::from_persisted(json!({"data": "oops"})).is_err());
        assert!(PayloadEncoder::from_persisted(json!({"unrelated": 1})).is_err());
    }
}
