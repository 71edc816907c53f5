//! Tagged variant for untyped workflow data (spec §9 "Dynamic field access").
//!
//! Step `with`/`env`/`outputs` values, raw action results, and resolution
//! scope entries are all represented uniformly by `Value` rather than by a
//! bag of `serde_json::Value`s sprinkled through the codebase, so the
//! resolver's path traversal has exactly one shape to walk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A dynamically typed value flowing through the resolver and action layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl Value {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Mapping(m) => Some(m),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Self::Sequence(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Dotted-path lookup (`a.b.c`) into a mapping, descending through
    /// nested mappings and numeric sequence indices.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut current = self;
        for key in path.split('.').filter(|k| !k.is_empty()) {
            current = match current {
                Self::Mapping(m) => m.get(key)?,
                Self::Sequence(s) => s.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Truthiness per spec §4.8 step 1: bool as-is; string falsy only on
    /// lowercase "false", "0", or empty; otherwise falsy iff null/zero.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => {
                let lower = s.to_lowercase();
                !(lower.is_empty() || lower == "false" || lower == "0")
            }
            Self::Sequence(_) | Self::Mapping(_) => true,
        }
    }

    /// Render as a plain string for textual substitution (non-exact-match
    /// interpolation). Missing/null renders as empty string.
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::String(s) => s.clone(),
            Self::Sequence(_) | Self::Mapping(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Is this value "unset" in the sense the default operator (`||`) cares
    /// about: null, or an empty string.
    #[must_use]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Null) || matches!(self, Self::String(s) if s.is_empty())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(a) => Self::Sequence(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Self::Mapping(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}
