//! Attribute conversion.
//!
//! Span attributes arrive from callers as untyped JSON-style mappings (the
//! closest Rust analogue to a `map[string]any`). This module infers a concrete
//! attribute kind per value and produces the ordered, unique-key attribute set
//! carried by spans and events.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Untyped attribute mapping accepted at the public API boundary.
pub type AttrMap = serde_json::Map<String, Value>;

/// A typed attribute value.
///
/// Only the four kinds the converter can produce exist; everything else
/// degrades to its string rendering before it reaches a span.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl std::fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttributeValue::Bool(v) => write!(f, "{v}"),
            AttributeValue::I64(v) => write!(f, "{v}"),
            AttributeValue::F64(v) => write!(f, "{v}"),
            AttributeValue::Str(v) => f.write_str(v),
        }
    }
}

/// One typed attribute.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AttributeValue,
}

/// Ordered attribute set with unique keys.
///
/// Insertion order is preserved; setting an existing key replaces its value in
/// place (last write wins). Serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<KeyValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, replacing any existing entry for the key.
    pub fn set(&mut self, key: impl Into<String>, value: AttributeValue) {
        let key = key.into();
        if let Some(existing) = self.0.iter_mut().find(|kv| kv.key == key) {
            existing.value = value;
        } else {
            self.0.push(KeyValue { key, value });
        }
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|kv| kv.key == key).map(|kv| &kv.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for kv in &self.0 {
            map.serialize_entry(&kv.key, &kv.value)?;
        }
        map.end()
    }
}

/// Converts an untyped mapping into a typed attribute set.
///
/// Inference order per value: bool, then any integer representable as `i64`,
/// then float, then string; null, arrays, objects, and out-of-range integers
/// fall back to their JSON string rendering. Unsupported kinds never error.
pub fn convert_attrs(kvs: &AttrMap) -> Attributes {
    let mut attrs = Attributes::new();
    for (key, value) in kvs {
        attrs.set(key.clone(), convert_value(value));
    }
    attrs
}

/// Infers the typed kind for a single untyped value.
pub fn convert_value(value: &Value) -> AttributeValue {
    match value {
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AttributeValue::I64(i)
            } else if let Some(f) = n.as_f64() {
                AttributeValue::F64(f)
            } else {
                AttributeValue::Str(n.to_string())
            }
        }
        Value::String(s) => AttributeValue::Str(s.clone()),
        other => AttributeValue::Str(other.to_string()),
    }
}

/// Coerces a JSON value into an attribute mapping, treating anything that is
/// not an object as empty.
pub fn attrs_from(value: Value) -> AttrMap {
    match value {
        Value::Object(map) => map,
        _ => AttrMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_primitive_kinds() {
        let map = attrs_from(json!({
            "flag": true,
            "count": 42,
            "ratio": 0.5,
            "name": "reader",
        }));
        let attrs = convert_attrs(&map);

        assert_eq!(attrs.len(), 4);
        assert_eq!(attrs.get("flag"), Some(&AttributeValue::Bool(true)));
        assert_eq!(attrs.get("count"), Some(&AttributeValue::I64(42)));
        assert_eq!(attrs.get("ratio"), Some(&AttributeValue::F64(0.5)));
        assert_eq!(
            attrs.get("name"),
            Some(&AttributeValue::Str("reader".to_string()))
        );
    }

    #[test]
    fn unsupported_kinds_degrade_to_strings() {
        let map = attrs_from(json!({
            "nothing": null,
            "list": [1, 2],
            "nested": {"a": 1},
            "huge": u64::MAX,
        }));
        let attrs = convert_attrs(&map);

        assert_eq!(attrs.get("nothing"), Some(&AttributeValue::Str("null".to_string())));
        assert_eq!(attrs.get("list"), Some(&AttributeValue::Str("[1,2]".to_string())));
        assert_eq!(
            attrs.get("nested"),
            Some(&AttributeValue::Str("{\"a\":1}".to_string()))
        );
        assert_eq!(
            attrs.get("huge"),
            Some(&AttributeValue::Str(u64::MAX.to_string()))
        );
    }

    #[test]
    fn empty_mapping_yields_empty_attrs() {
        assert!(convert_attrs(&AttrMap::new()).is_empty());
        assert!(convert_attrs(&attrs_from(json!("not an object"))).is_empty());
    }

    #[test]
    fn negative_and_wide_integers_stay_integers() {
        let map = attrs_from(json!({"neg": -7, "wide": i64::MAX}));
        let attrs = convert_attrs(&map);
        assert_eq!(attrs.get("neg"), Some(&AttributeValue::I64(-7)));
        assert_eq!(attrs.get("wide"), Some(&AttributeValue::I64(i64::MAX)));
    }

    #[test]
    fn set_replaces_existing_key_in_place() {
        let mut attrs = Attributes::new();
        attrs.set("k", AttributeValue::I64(1));
        attrs.set("other", AttributeValue::Bool(false));
        attrs.set("k", AttributeValue::Str("second".to_string()));

        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("k"), Some(&AttributeValue::Str("second".to_string())));
        // first-insertion order is kept
        assert_eq!(attrs.iter().next().map(|kv| kv.key.as_str()), Some("k"));
    }

    #[test]
    fn serializes_as_json_object() {
        let mut attrs = Attributes::new();
        attrs.set("a", AttributeValue::I64(1));
        attrs.set("b", AttributeValue::Bool(true));
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json, json!({"a": 1, "b": true}));
    }
}
