//! Hierarchical metadata trees and the deep-merge store
//!
//! Metadata groups (device info, user info, headers, ...) are nested
//! mappings merged into every event. A tree is made of [`MetadataValue`]s:
//! either a `Leaf` holding a scalar or array, or a `Node` holding further
//! keys. The shape is fixed when the tree is built from JSON, so merging never
//! has to inspect values at runtime to decide whether to recurse.
//!
//! `null` members are dropped on conversion, along with groups that held only
//! nulls; a tree never stores a null leaf.
//!
//! # Example
//!
//! ```rust
//! use tally_core::metadata::MetadataStore;
//! use serde_json::json;
//!
//! let mut store = MetadataStore::new();
//! store.merge_value(json!({"userInfo": {"name": "Tester"}}));
//! store.merge_value(json!({"userInfo": {"age": 29}}));
//!
//! assert_eq!(
//!     store.collect().to_value(),
//!     json!({"userInfo": {"name": "Tester", "age": 29}})
//! );
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::util::to_snake_case;

/// One value in a metadata tree
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    /// Scalar or array value (never null)
    Leaf(Value),
    /// Nested mapping
    Node(MetadataNode),
}

impl MetadataValue {
    /// Convert arbitrary JSON, returning `None` for `null`
    ///
    /// An object whose members are all null (at any depth) is also `None`, so
    /// merging it leaves the target untouched. A literal `{}` stays an empty
    /// node and replaces on merge.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Object(map) => {
                let had_members = !map.is_empty();
                let node = MetadataNode::from_map(map);
                if had_members && node.is_empty() {
                    None
                } else {
                    Some(MetadataValue::Node(node))
                }
            }
            other => Some(MetadataValue::Leaf(other)),
        }
    }

    /// Render back to JSON
    pub fn to_value(&self) -> Value {
        match self {
            MetadataValue::Leaf(value) => value.clone(),
            MetadataValue::Node(node) => node.to_value(),
        }
    }

    fn to_snake_cased_value(&self) -> Value {
        match self {
            MetadataValue::Leaf(value) => value.clone(),
            MetadataValue::Node(node) => node.to_snake_cased_value(),
        }
    }
}

/// A nested mapping of metadata keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataNode {
    entries: BTreeMap<String, MetadataValue>,
}

impl MetadataNode {
    /// Create an empty node
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a node from a JSON object, dropping null members at every depth
    ///
    /// Child objects that held only nulls are dropped with them.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let entries = map
            .into_iter()
            .filter_map(|(key, value)| MetadataValue::from_value(value).map(|v| (key, v)))
            .collect();
        Self { entries }
    }

    /// Build a node from JSON; `None` unless the value is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from_map(map)),
            _ => None,
        }
    }

    /// Whether the node has no keys
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up a direct child
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    /// Look up a nested value by path
    pub fn get_path(&self, path: &[&str]) -> Option<&MetadataValue> {
        let (first, rest) = path.split_first()?;
        let value = self.entries.get(*first)?;
        if rest.is_empty() {
            return Some(value);
        }
        match value {
            MetadataValue::Node(node) => node.get_path(rest),
            MetadataValue::Leaf(_) => None,
        }
    }

    /// Set a direct child; a null value is ignored
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        if let Some(value) = MetadataValue::from_value(value) {
            self.entries.insert(key.into(), value);
        }
    }

    /// Iterate over direct children in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.entries.iter()
    }

    /// Deep-merge `incoming` into this node.
    ///
    /// Where both sides hold a node and the incoming node is non-empty the
    /// merge recurses; otherwise the incoming value replaces the current one.
    pub fn merge(&mut self, incoming: &MetadataNode) {
        for (key, value) in &incoming.entries {
            match (self.entries.get_mut(key), value) {
                (Some(MetadataValue::Node(existing)), MetadataValue::Node(child))
                    if !child.is_empty() =>
                {
                    existing.merge(child);
                }
                _ => {
                    self.entries.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Render the tree as a JSON object with its original keys
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(key, value)| (key.clone(), value.to_value()))
                .collect(),
        )
    }

    /// Render the tree as a JSON object with snake_cased keys at every depth
    pub fn to_snake_cased_value(&self) -> Value {
        Value::Object(self.to_snake_cased_map())
    }

    pub(crate) fn to_snake_cased_map(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(key, value)| (to_snake_case(key), value.to_snake_cased_value()))
            .collect()
    }
}

impl TryFrom<Value> for MetadataNode {
    type Error = CoreError;

    fn try_from(value: Value) -> CoreResult<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map)),
            other => Err(CoreError::InvalidMetadata {
                reason: format!("expected an object, got {}", json_kind(&other)),
            }),
        }
    }
}

impl From<MetadataNode> for Value {
    fn from(node: MetadataNode) -> Self {
        node.to_value()
    }
}

impl Serialize for MetadataNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MetadataNode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        MetadataNode::try_from(value).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Holds one metadata tree and deep-merges new trees into it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataStore {
    tree: MetadataNode,
}

impl MetadataStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `tree`
    pub fn with_tree(tree: MetadataNode) -> Self {
        Self { tree }
    }

    /// Deep-merge a tree into the store
    pub fn merge(&mut self, tree: &MetadataNode) {
        self.tree.merge(tree);
    }

    /// Deep-merge arbitrary JSON; anything other than an object is a no-op
    pub fn merge_value(&mut self, value: Value) {
        if let Some(node) = MetadataNode::from_value(value) {
            self.tree.merge(&node);
        }
    }

    /// The current merged tree
    pub fn collect(&self) -> &MetadataNode {
        &self.tree
    }

    /// Discard everything and start again from `tree`
    pub fn reset(&mut self, tree: MetadataNode) {
        self.tree = MetadataNode::new();
        self.tree.merge(&tree);
    }

    /// Whether nothing has been merged yet
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Consume the store and return its tree
    pub fn into_tree(self) -> MetadataNode {
        self.tree
    }
}
