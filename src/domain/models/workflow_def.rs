//! `WorkflowDefinition` and `Step` — the immutable input data model (spec §3).

use super::super::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed input declared at workflow scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Declares which secret keys a workflow may reference, without values.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsSpec {
    pub vault: Option<String>,
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Metadata block (`metadata { name, description, tags, owner, ... }`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub owner: Option<String>,
    pub version: Option<String>,
}

/// Default timeout / adapter applied when a step doesn't override them.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsBlock {
    pub timeout: Option<String>,
    pub adapter: Option<String>,
}

/// Workflow-wide failure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Stop,
    Continue,
    Isolate,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Stop
    }
}

/// Sandboxing level requested for action handler execution (advisory; the
/// core does not itself sandbox — it is surfaced to action providers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxLevel {
    None,
    Basic,
    Strict,
}

impl Default for SandboxLevel {
    fn default() -> Self {
        Self::None
    }
}

/// `policies { failure, concurrency, sandbox }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesBlock {
    #[serde(default)]
    pub failure: FailurePolicy,
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub sandbox: SandboxLevel,
}

impl Default for PoliciesBlock {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            concurrency: None,
            sandbox: SandboxLevel::default(),
        }
    }
}

/// Backoff shape for a step's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Linear,
    Exponential,
}

/// `retry { max, backoff, delay }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max: u32,
    pub backoff: BackoffStrategy,
    /// Delay duration string (`<int>{ms|s|m|h}`).
    pub delay: String,
}

/// A single named unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: Option<String>,
    pub uses: String,
    #[serde(default)]
    pub with: BTreeMap<String, Value>,
    #[serde(default)]
    pub needs: Vec<String>,
    pub when: Option<String>,
    /// Duration string (`<int>{ms|s|m|h}`).
    pub timeout: Option<String>,
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub continue_on_error: bool,
    /// alias -> dotted path into the raw action result.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    #[serde(default)]
    pub env: BTreeMap<String, Value>,
}

/// The full, immutable workflow document as parsed from an untrusted object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    pub secrets: SecretsSpec,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub defaults: DefaultsBlock,
    #[serde(default)]
    pub policies: PoliciesBlock,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

impl WorkflowDefinition {
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn declared_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unnamed")
    }
}

/// Parse a duration string (`<int>{ms|s|m|h}`) into milliseconds.
#[must_use]
pub fn parse_duration_ms(s: &str) -> Option<u64> {
    let (digits, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit())?);
    let n: u64 = digits.parse().ok()?;
    let multiplier = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => return None,
    };
    Some(n * multiplier)
}

/// Regex-free ID pattern check: `^[A-Za-z_][A-Za-z0-9_-]*$`.
#[must_use]
pub fn is_valid_id(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration_ms("500ms"), Some(500));
        assert_eq!(parse_duration_ms("30s"), Some(30_000));
        assert_eq!(parse_duration_ms("2m"), Some(120_000));
        assert_eq!(parse_duration_ms("1h"), Some(3_600_000));
        assert_eq!(parse_duration_ms("nonsense"), None);
    }

    #[test]
    fn id_pattern() {
        assert!(is_valid_id("a"));
        assert!(is_valid_id("_private"));
        assert!(is_valid_id("step-1_final"));
        assert!(!is_valid_id("1abc"));
        assert!(!is_valid_id("has space"));
        assert!(!is_valid_id(""));
    }
}
