//! Values carried by graph nodes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The value a node evaluates to.
///
/// Serialized untagged so it maps directly onto JSON config and event
/// payloads: `null`, numbers and strings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeValue {
    /// No value. Evaluates as `0` in arithmetic and as false in conditions.
    #[default]
    Null,

    /// A numeric value.
    Number(f64),

    /// A string value.
    Text(String),
}

impl NodeValue {
    /// Convert a JSON payload fragment into a node value.
    ///
    /// Booleans become `1`/`0`. Arrays and objects have no node value.
    pub fn from_json(json: &serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Number(if *b { 1.0 } else { 0.0 })),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    /// Numeric view of the value. Text that does not parse is NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    /// Truthiness used by conditional and logical nodes.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Text(s) => !s.is_empty(),
        }
    }
}

impl From<f64> for NodeValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for NodeValue {
    fn from(value: bool) -> Self {
        Self::Number(if value { 1.0 } else { 0.0 })
    }
}

impl From<&str> for NodeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}
