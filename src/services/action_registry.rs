//! Action Registry (C8): maps `uses` strings to pluggable Action Handlers.
//!
//! Grounded on the teacher's `Substrate`/`SubstrateFactory` port pair and
//! `SubstrateRegistry::get_substrate_for_agent` routing chain, adapted to
//! longest-prefix-match resolution per spec §4.6 and the "driver
//! indirection" design note (§9): one registry, collapsed from the
//! teacher's legacy-handler-plus-driver split, with a `can_handle`
//! predicate left in place for future alternative drivers.

use crate::domain::error::{EngineError, ErrorCategory, ErrorSeverity};
use crate::domain::value::Value;
use crate::services::step_executor::CancelToken;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Capability metadata a handler advertises for a family of actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub concurrent: bool,
    pub cacheable: bool,
    pub idempotent: bool,
}

/// Context passed to a handler's `execute` call (spec §4.6).
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub workflow_name: String,
    pub step_id: String,
    pub execution_id: uuid::Uuid,
    pub secrets: BTreeMap<String, Value>,
    pub timeout_ms: u64,
    pub env: BTreeMap<String, Value>,
    pub step_outputs: BTreeMap<String, Value>,
    pub inputs: BTreeMap<String, Value>,
    pub workflow_context: BTreeMap<String, Value>,
    /// Scratch directory scoped to this step's single attempt. Handlers
    /// that write temporary files own cleanup; the kernel does not create
    /// or remove this path, only computes it (`{tmp}/orbyt/{execution}/{step}`).
    pub temp_dir: PathBuf,
    /// Working directory a shell/filesystem-flavored handler should treat
    /// as its root. Defaults to the process's own cwd.
    pub cwd: PathBuf,
    /// Mirrors the workflow's root cancel token (spec §5): a cooperative
    /// handler should poll this between internal suspension points and
    /// unwind early once it flips, rather than being forcibly killed.
    pub cancel_token: CancelToken,
}

impl ActionContext {
    /// Logs through `tracing`, scoped to the owning step/execution.
    pub fn log(&self, level: tracing::Level, message: &str) {
        match level {
            tracing::Level::ERROR => tracing::error!(step = %self.step_id, execution = %self.execution_id, "{message}"),
            tracing::Level::WARN => tracing::warn!(step = %self.step_id, execution = %self.execution_id, "{message}"),
            tracing::Level::INFO => tracing::info!(step = %self.step_id, execution = %self.execution_id, "{message}"),
            tracing::Level::DEBUG => tracing::debug!(step = %self.step_id, execution = %self.execution_id, "{message}"),
            tracing::Level::TRACE => tracing::trace!(step = %self.step_id, execution = %self.execution_id, "{message}"),
        }
    }

    /// True once the workflow's root cancel token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_token.borrow()
    }
}

/// The raw result a handler returns; `error.code`, if set and in the fixed
/// retryable set, lets the step executor decide whether to retry.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<EngineError>,
    pub duration_ms: Option<u64>,
    /// Free-form log lines a handler wants attached to its step's record,
    /// distinct from what it sends through `ActionContext::log` (spec §4.6).
    pub logs: Vec<String>,
    /// Side effects a handler wants to surface for audit/explain purposes
    /// (e.g. "wrote file X", "created resource Y") without encoding them
    /// into `output`.
    pub effects: Vec<String>,
}

impl ActionResult {
    #[must_use]
    pub fn ok(output: Value) -> Self {
        Self { success: true, output, error: None, duration_ms: None, logs: Vec::new(), effects: Vec::new() }
    }

    #[must_use]
    pub fn err(error: EngineError) -> Self {
        Self { success: false, output: Value::Null, error: Some(error), duration_ms: None, logs: Vec::new(), effects: Vec::new() }
    }

    #[must_use]
    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }

    #[must_use]
    pub fn with_effects(mut self, effects: Vec<String>) -> Self {
        self.effects = effects;
        self
    }
}

/// Pluggable implementation of a family of `uses` strings.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;
    fn version(&self) -> &str {
        "1.0.0"
    }
    /// Exact strings or globbed prefixes (e.g. `http.*`).
    fn supported_actions(&self) -> Vec<String>;
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }
    /// Predicate form, preserved per spec §9 for future alternative drivers
    /// (in-process vs. sandboxed) without touching the registry's core
    /// resolution algorithm.
    fn can_handle(&self, uses: &str) -> bool {
        self.supported_actions().iter().any(|pattern| prefix_matches(pattern, uses))
    }
    async fn execute(&self, action: &str, resolved_input: &BTreeMap<String, Value>, ctx: &ActionContext) -> ActionResult;
}

/// True if `pattern` (exact, or ending in `.*`) matches `uses`, and returns
/// the length of the matched literal prefix for longest-prefix comparison.
fn prefix_matches(pattern: &str, uses: &str) -> bool {
    prefix_match_len(pattern, uses).is_some()
}

fn prefix_match_len(pattern: &str, uses: &str) -> Option<usize> {
    if let Some(stripped) = pattern.strip_suffix(".*") {
        if uses == stripped || uses.starts_with(&format!("{stripped}.")) {
            return Some(stripped.len());
        }
        None
    } else if pattern == uses {
        Some(pattern.len())
    } else {
        None
    }
}

struct Registration {
    handler: Arc<dyn ActionHandler>,
    lock: Arc<Mutex<()>>,
}

/// Resolves `uses` strings to handlers by longest registered-prefix match.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    registrations: Vec<Registration>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.registrations.push(Registration { handler, lock: Arc::new(Mutex::new(())) });
    }

    /// Resolve `uses` by longest-prefix match; ties beyond the longest
    /// prefix are rejected as ambiguous rather than silently broken by
    /// registration order (spec §9 Open Question (a)).
    pub fn resolve(&self, uses: &str) -> Result<Arc<dyn ActionHandler>, EngineError> {
        let mut best: Option<(usize, usize)> = None; // (match_len, registration_index)
        for pattern in self.registrations.iter().enumerate().flat_map(|(idx, r)| {
            r.handler.supported_actions().into_iter().filter_map(move |p| prefix_match_len(&p, uses).map(|len| (len, idx)))
        }) {
            match best {
                None => best = Some(pattern),
                Some((len, _)) if pattern.0 > len => best = Some(pattern),
                Some((len, idx)) if pattern.0 == len && pattern.1 != idx => {
                    return Err(self.unknown_adapter(uses).with_hint("two handlers match this action with equally long prefixes; register a more specific one or remove the overlap"));
                }
                _ => {}
            }
        }

        best.map(|(_, idx)| Arc::clone(&self.registrations[idx].handler))
            .ok_or_else(|| self.unknown_adapter(uses))
    }

    fn unknown_adapter(&self, uses: &str) -> EngineError {
        EngineError::new(
            ErrorCategory::Validation,
            "UNKNOWN_ADAPTER",
            ErrorSeverity::Error,
            format!("no action handler registered for '{uses}'"),
        )
        .with_hint("register a handler whose supported_actions() covers this `uses` string")
    }

    /// Acquire the per-handler mutual-exclusion guard for non-concurrent
    /// handlers. Concurrent handlers never contend on this.
    pub async fn lock_for(&self, uses: &str) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        let idx = self
            .registrations
            .iter()
            .position(|r| r.handler.supported_actions().iter().any(|p| prefix_matches(p, uses)))?;
        let reg = &self.registrations[idx];
        if reg.handler.capabilities().concurrent {
            None
        } else {
            Some(Arc::clone(&reg.lock).lock_owned().await)
        }
    }
}
