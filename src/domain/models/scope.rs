//! `ResolutionScope` — the namespace-keyed record the resolver reads from
//! (spec §3, §4.2 namespace rules, §9 "prototype pollution" design note).
//!
//! Modeled as an explicit struct with typed namespace fields rather than a
//! single deep-mergeable map, so a caller-supplied context can never clobber
//! engine-owned namespaces like `run` or `metadata`.

use super::super::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// `workflow` namespace: identity of the definition being executed.
#[derive(Debug, Clone, Default)]
pub struct WorkflowNamespace {
    pub id: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub owner: Option<String>,
}

/// `run` namespace: identity of this particular execution.
#[derive(Debug, Clone)]
pub struct RunNamespace {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub triggered_by: Option<String>,
}

/// Reserved but unimplemented namespaces (spec §3, §4.2). Any lookup here
/// fails with a well-defined error kind rather than silently returning null.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservedNamespace {
    Telemetry,
    Resources,
    Compliance,
}

impl ReservedNamespace {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "telemetry" => Some(Self::Telemetry),
            "resources" => Some(Self::Resources),
            "compliance" => Some(Self::Compliance),
            _ => None,
        }
    }
}

/// The full scope passed to the variable resolver and to action handlers.
#[derive(Debug, Clone, Default)]
pub struct ResolutionScope {
    pub env: BTreeMap<String, Value>,
    /// stepId -> raw recorded output.
    pub steps: BTreeMap<String, Value>,
    pub workflow: Option<WorkflowNamespace>,
    pub run: Option<RunNamespace>,
    pub inputs: BTreeMap<String, Value>,
    pub secrets: BTreeMap<String, Value>,
    /// Engine-injected execution context (`identity, ownership, billing,
    /// usage, audit`), addressed only by the engine itself — never exposed
    /// under a key a workflow author could write.
    pub metadata: BTreeMap<String, Value>,
    /// Caller-supplied free-form context, sanitized key-by-key at merge
    /// time (spec §9: no deep-merge of engine fields).
    pub context: BTreeMap<String, Value>,
}

/// Reserved top-level/context key prefixes and exact names a caller may
/// never inject (spec §4.7 step 1, §4.11).
pub const RESERVED_PREFIXES: &[&str] = &["orbyt.", "_"];
pub const RESERVED_KEYS: &[&str] = &["identity", "ownership", "billing", "usage", "audit", "internal"];

#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_') || RESERVED_PREFIXES.iter().any(|p| key.starts_with(p)) || RESERVED_KEYS.contains(&key)
}

impl ResolutionScope {
    /// Merge caller-supplied context key-by-key, refusing any reserved name.
    /// Never deep-merges into engine-owned namespaces.
    pub fn merge_caller_context(&mut self, caller_context: BTreeMap<String, Value>) {
        for (key, value) in caller_context {
            if !is_reserved_key(&key) {
                self.context.insert(key, value);
            }
        }
    }

    #[must_use]
    pub fn step_output(&self, step_id: &str) -> Option<&Value> {
        self.steps.get(step_id)
    }

    pub fn record_step_output(&mut self, step_id: impl Into<String>, output: Value) {
        self.steps.insert(step_id.into(), output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_keys_are_rejected() {
        assert!(is_reserved_key("_private"));
        assert!(is_reserved_key("identity"));
        assert!(is_reserved_key("orbyt.internal"));
        assert!(!is_reserved_key("region"));
    }

    #[test]
    fn merge_strips_reserved_keys() {
        let mut scope = ResolutionScope::default();
        let mut caller = BTreeMap::new();
        caller.insert("region".to_string(), Value::String("us-east".into()));
        caller.insert("_hack".to_string(), Value::Bool(true));
        caller.insert("billing".to_string(), Value::Bool(true));
        scope.merge_caller_context(caller);
        assert!(scope.context.contains_key("region"));
        assert!(!scope.context.contains_key("_hack"));
        assert!(!scope.context.contains_key("billing"));
    }

    #[test]
    fn reserved_namespace_parses_known_three() {
        assert_eq!(ReservedNamespace::parse("telemetry"), Some(ReservedNamespace::Telemetry));
        assert_eq!(ReservedNamespace::parse("resources"), Some(ReservedNamespace::Resources));
        assert_eq!(ReservedNamespace::parse("compliance"), Some(ReservedNamespace::Compliance));
        assert_eq!(ReservedNamespace::parse("env"), None);
    }
}
