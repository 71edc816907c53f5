//! Structured error model (C1).
//!
//! A single error type carries a stable code, category, severity, and the
//! context needed to render a helpful message. Severity drives execution
//! control: the supervisor never branches on a message string, only on
//! `ExecutionControl`.

use serde::Serialize;
use std::fmt;

/// Category inferred from the error code's second segment (`ORB-<cat>-<n>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input object (`ORB-S-*`).
    Schema,
    /// Cross-reference / graph / security violation (`ORB-V-*`).
    Validation,
    /// Failure while running a step (`ORB-E-*`).
    Execution,
    /// Internal / resource failure not tied to a specific step (`ORB-R-*`).
    Runtime,
}

impl ErrorCategory {
    const fn code_letter(self) -> char {
        match self {
            Self::Schema => 'S',
            Self::Validation => 'V',
            Self::Execution => 'E',
            Self::Runtime => 'R',
        }
    }
}

/// Severity determines how the supervisor reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Low,
    Medium,
    Error,
    Fatal,
    Critical,
}

/// What the supervisor must do once an error of a given severity surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionControl {
    StopWorkflow,
    StopStep,
    Continue,
}

/// Pure mapping from severity to control decision (spec §4.1).
#[must_use]
pub const fn control_for(severity: ErrorSeverity) -> ExecutionControl {
    match severity {
        ErrorSeverity::Critical | ErrorSeverity::Fatal | ErrorSeverity::Error => {
            ExecutionControl::StopWorkflow
        }
        ErrorSeverity::Medium => ExecutionControl::StopStep,
        ErrorSeverity::Low | ErrorSeverity::Warning | ErrorSeverity::Info => {
            ExecutionControl::Continue
        }
    }
}

/// Exit code a CLI embedding the engine should return for a given code.
#[must_use]
pub fn exit_code_for(code: &str) -> i32 {
    match code {
        c if c.starts_with("ORB-S-") => 1,
        "ORB-V-CIRCULAR_DEPENDENCY" => 2,
        c if c.starts_with("ORB-V-") => 1,
        "ORB-R-PERMISSION_DENIED" => 6,
        c if c.starts_with("ORB-R-") => 4,
        c if c.starts_with("ORB-E-") => 2,
        _ => 4,
    }
}

/// Additional context carried alongside the stable code and message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorContext {
    pub field: Option<String>,
    pub valid_alternatives: Vec<String>,
    pub suggestion: Option<String>,
    pub extra: Vec<(String, String)>,
}

/// The engine's single structured error type.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub message: String,
    pub hint: Option<String>,
    pub path: Option<String>,
    pub context: ErrorContext,
    /// The underlying cause, when this error wraps one (spec §7: "wrapped in
    /// a new error that preserves the original cause"). Not serialized: a
    /// boxed trait object carries no stable shape for a JSON result.
    #[source]
    #[serde(skip)]
    pub source: Option<std::sync::Arc<dyn std::error::Error + Send + Sync>>,
}

impl EngineError {
    #[must_use]
    pub fn new(category: ErrorCategory, name: &str, severity: ErrorSeverity, message: impl Into<String>) -> Self {
        Self {
            code: format!("ORB-{}-{name}", category.code_letter()),
            category,
            severity,
            message: message.into(),
            hint: None,
            path: None,
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Attach the original cause, preserving it rather than discarding it.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(std::sync::Arc::new(source));
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub const fn control(&self) -> ExecutionControl {
        control_for(self.severity)
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        exit_code_for(&self.code)
    }

    /// Codes that the step executor treats as retryable by default (spec §4.8).
    #[must_use]
    pub fn is_retryable(code: &str) -> bool {
        matches!(
            code,
            "ORB-E-TIMEOUT" | "ORB-E-ADAPTER_ERROR" | "ORB-R-RESOURCE_EXHAUSTED"
        )
    }

    /// Classify a raw, unstructured exception message into an execution error,
    /// preserving the original cause. Used when an action handler panics or
    /// returns an untyped error.
    #[must_use]
    pub fn classify_exception(message: &str) -> Self {
        let lower = message.to_lowercase();
        let (name, severity) = if lower.contains("yaml") || lower.contains("parse") || lower.contains("syntax") {
            ("SYNTAX", ErrorSeverity::Error)
        } else if lower.contains("unknown field") {
            ("UNKNOWN_FIELD", ErrorSeverity::Error)
        } else if lower.contains("missing") || lower.contains("required") {
            ("MISSING_FIELD", ErrorSeverity::Error)
        } else if lower.contains("type") && lower.contains("expected") {
            ("TYPE_MISMATCH", ErrorSeverity::Error)
        } else if lower.contains("circular") || lower.contains("cycle") {
            ("CIRCULAR_DEPENDENCY", ErrorSeverity::Fatal)
        } else if lower.contains("duplicate") {
            ("DUPLICATE_ID", ErrorSeverity::Error)
        } else if lower.contains("timeout") {
            return Self::new(ErrorCategory::Execution, "TIMEOUT", ErrorSeverity::Medium, message);
        } else if lower.contains("permission") || lower.contains("denied") {
            ("PERMISSION_DENIED", ErrorSeverity::Critical)
        } else {
            return Self::new(ErrorCategory::Execution, "ADAPTER_ERROR", ErrorSeverity::Medium, message);
        };
        Self::new(ErrorCategory::Validation, name, severity, message)
    }

    /// Like [`Self::classify_exception`], but for a real error value rather
    /// than a bare string: the cause is preserved on the resulting error
    /// instead of being discarded.
    #[must_use]
    pub fn classify_exception_from(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::classify_exception(&source.to_string()).with_source(source)
    }
}

/// Context describing the location and nature of a validation failure, used
/// to dispatch to the right factory (spec §4.1 "policy-driven" detection).
#[derive(Debug, Clone)]
pub struct DetectionContext<'a> {
    pub kind: &'a str,
    pub field: &'a str,
    pub location: &'a str,
    pub expected: Option<&'a str>,
    pub actual: Option<&'a str>,
}

/// Dispatch a `DetectionContext` to the matching error factory.
#[must_use]
pub fn classify(ctx: &DetectionContext<'_>) -> EngineError {
    let path = format!("{}.{}", ctx.location, ctx.field);
    match ctx.kind {
        "unknown_field" => EngineError::new(
            ErrorCategory::Schema,
            "UNKNOWN_FIELD",
            ErrorSeverity::Error,
            format!("unknown field '{}' at {}", ctx.field, ctx.location),
        )
        .with_path(path),
        "missing_field" => EngineError::new(
            ErrorCategory::Schema,
            "MISSING_FIELD",
            ErrorSeverity::Error,
            format!("missing required field '{}' at {}", ctx.field, ctx.location),
        )
        .with_path(path),
        "type_mismatch" => EngineError::new(
            ErrorCategory::Schema,
            "TYPE_MISMATCH",
            ErrorSeverity::Error,
            format!(
                "field '{}' expected {} but got {}",
                ctx.field,
                ctx.expected.unwrap_or("?"),
                ctx.actual.unwrap_or("?")
            ),
        )
        .with_path(path),
        other => EngineError::new(
            ErrorCategory::Validation,
            "INVALID",
            ErrorSeverity::Error,
            format!("invalid {other} at {}", ctx.location),
        )
        .with_path(path),
    }
}

/// Suggest the nearest known field name for a typo, if close enough.
///
/// Uses normalized Levenshtein distance (`1 - distance / max_len`); returns
/// `None` below a similarity ratio of 0.6.
#[must_use]
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|candidate| (candidate, similarity_ratio(unknown, candidate)))
        .filter(|(_, ratio)| *ratio >= 0.6)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(candidate, _)| (*candidate).to_string())
}

fn similarity_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut prev = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let tmp = row[j + 1];
            row[j + 1] = if ca == cb {
                prev
            } else {
                1 + prev.min(row[j]).min(row[j + 1])
            };
            prev = tmp;
        }
    }
    row[b.len()]
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Schema => "schema",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Runtime => "runtime",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_for_matches_spec_table() {
        assert_eq!(control_for(ErrorSeverity::Critical), ExecutionControl::StopWorkflow);
        assert_eq!(control_for(ErrorSeverity::Fatal), ExecutionControl::StopWorkflow);
        assert_eq!(control_for(ErrorSeverity::Error), ExecutionControl::StopWorkflow);
        assert_eq!(control_for(ErrorSeverity::Medium), ExecutionControl::StopStep);
        assert_eq!(control_for(ErrorSeverity::Low), ExecutionControl::Continue);
        assert_eq!(control_for(ErrorSeverity::Warning), ExecutionControl::Continue);
        assert_eq!(control_for(ErrorSeverity::Info), ExecutionControl::Continue);
    }

    #[test]
    fn suggest_field_finds_close_typo() {
        let known = ["timeout", "retry", "needs", "uses"];
        assert_eq!(suggest_field("timeuot", &known), Some("timeout".to_string()));
        assert_eq!(suggest_field("completely_different_xyz", &known), None);
    }

    #[test]
    fn classify_exception_picks_circular() {
        let err = EngineError::classify_exception("circular dependency detected in graph");
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(err.severity, ErrorSeverity::Fatal);
    }

    #[test]
    fn classify_exception_defaults_to_adapter_error() {
        let err = EngineError::classify_exception("socket hung up unexpectedly");
        assert_eq!(err.code, "ORB-E-ADAPTER_ERROR");
        assert!(EngineError::is_retryable(&err.code));
    }

    #[test]
    fn is_retryable_matches_fixed_set() {
        assert!(EngineError::is_retryable("ORB-E-TIMEOUT"));
        assert!(EngineError::is_retryable("ORB-E-ADAPTER_ERROR"));
        assert!(EngineError::is_retryable("ORB-R-RESOURCE_EXHAUSTED"));
        assert!(!EngineError::is_retryable("ORB-V-CIRCULAR_DEPENDENCY"));
    }

    #[derive(Debug)]
    struct StubError(String);

    impl fmt::Display for StubError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for StubError {}

    #[test]
    fn with_source_preserves_cause() {
        let cause = StubError("disk full".to_string());
        let err = EngineError::new(ErrorCategory::Runtime, "IO_ERROR", ErrorSeverity::Error, "write failed")
            .with_source(cause);
        let source = std::error::Error::source(&err).expect("cause should be preserved");
        assert_eq!(source.to_string(), "disk full");
    }

    #[test]
    fn classify_exception_from_preserves_cause_and_classification() {
        let cause = StubError("circular dependency detected in graph".to_string());
        let err = EngineError::classify_exception_from(cause);
        assert_eq!(err.severity, ErrorSeverity::Fatal);
        let source = std::error::Error::source(&err).expect("cause should be preserved");
        assert_eq!(source.to_string(), "circular dependency detected in graph");
    }
}
