//! Dynamic configuration documents
//!
//! Delegate configurations are open-ended JSON objects: headcni only cares
//! about a handful of keys and passes everything else through untouched.
//! `Document` wraps a JSON object and offers typed accessors that fail with
//! [`Error::TypeMismatch`] instead of silently coercing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A string-keyed JSON object with typed accessors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(Error::TypeMismatch {
                key: "<document>".to_string(),
                expected: "object",
            }),
        }
    }

    /// Parse a document from raw JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string field; present-but-not-a-string is an error
    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(mismatch(key, "string")),
        }
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(_) => Err(mismatch(key, "boolean")),
        }
    }

    pub fn get_object(&self, key: &str) -> Result<Option<Document>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Self(map.clone()))),
            Some(_) => Err(mismatch(key, "object")),
        }
    }

    /// Get a string field that must be present and non-empty
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.get_str(key)? {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(Error::config(format!("missing required '{}' field", key))),
        }
    }

    /// Set a field, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set a field only when it is absent. Returns whether it was inserted.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) -> bool {
        if self.0.contains_key(key) {
            return false;
        }
        self.0.insert(key.to_string(), value.into());
        true
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}

fn mismatch(key: &str, expected: &'static str) -> Error {
    Error::TypeMismatch {
        key: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_typed_accessors() {
        let d = doc(json!({"type": "bridge", "isGateway": true, "ipam": {"type": "host-local"}}));
        assert_eq!(d.get_str("type").unwrap(), Some("bridge"));
        assert_eq!(d.get_bool("isGateway").unwrap(), Some(true));
        assert_eq!(
            d.get_object("ipam").unwrap().unwrap().get_str("type").unwrap(),
            Some("host-local")
        );
        assert_eq!(d.get_str("missing").unwrap(), None);
    }

    #[test]
    fn test_type_mismatch_is_explicit() {
        let d = doc(json!({"type": 42}));
        let err = d.get_str("type").unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { ref key, expected: "string" } if key == "type"));
        assert!(d.get_object("type").is_err());
    }

    #[test]
    fn test_set_default_never_overwrites() {
        let mut d = doc(json!({"mtu": 9000}));
        assert!(!d.set_default("mtu", 1450));
        assert!(d.set_default("ipMasq", false));
        assert_eq!(d.get("mtu"), Some(&json!(9000)));
        assert_eq!(d.get("ipMasq"), Some(&json!(false)));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Document::from_value(json!([1, 2])).is_err());
        assert!(Document::from_slice(b"\"text\"").is_err());
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let bytes = br#"{"type":"vendor","vendorKnob":{"a":[1,2]}}"#;
        let d = Document::from_slice(bytes).unwrap();
        let back: Value = serde_json::from_slice(&d.to_bytes().unwrap()).unwrap();
        assert_eq!(back["vendorKnob"], json!({"a": [1, 2]}));
    }
}
