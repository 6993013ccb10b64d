//! Param and result values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A param or result value: string, array of strings, or string map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunValue {
    String(String),
    Array(Vec<String>),
    Object(BTreeMap<String, String>),
}

impl RunValue {
    /// The string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RunValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The map value, if this is an object.
    pub fn as_object(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            RunValue::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Render as JSON for provenance payloads.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl From<&str> for RunValue {
    fn from(s: &str) -> Self {
        RunValue::String(s.to_string())
    }
}

/// A named result emitted by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub value: RunValue,
}

impl RunResult {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: RunValue::String(value.into()),
        }
    }
}

/// A named param passed to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: RunValue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untagged_variants() {
        let s: RunValue = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(s.as_str(), Some("abc"));

        let a: RunValue = serde_json::from_value(json!(["a", "b"])).unwrap();
        assert_eq!(a, RunValue::Array(vec!["a".into(), "b".into()]));

        let o: RunValue = serde_json::from_value(json!({"uri": "u", "digest": "d"})).unwrap();
        assert_eq!(o.as_object().unwrap()["uri"], "u");
        assert!(o.as_str().is_none());
    }
}
