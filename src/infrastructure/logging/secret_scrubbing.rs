//! Redacts known secret VALUES from log output.
//!
//! Unlike a generic pattern-matching scrubber, this layer does not guess at
//! what a secret looks like: it is handed the actual values a workflow's
//! `secrets` namespace resolved to (via [`SecretRegistry::register`]) and
//! replaces any exact occurrence of one of those values in a log message.
//! This avoids depending on a `regex` crate the rest of the stack does not
//! otherwise need, and it catches secrets regardless of their shape (API
//! key, password, connection string, ...).

use crate::domain::value::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::Layer;

static GLOBAL_SECRET_REGISTRY: OnceLock<SecretRegistry> = OnceLock::new();

/// The process-wide registry the logging subscriber scrubs against. The
/// engine façade registers each run's resolved `secrets` namespace here
/// before executing; `LoggerImpl::init` wraps stdout/file writers around
/// the same instance so redaction stays live across the process lifetime
/// rather than being pinned to whichever workflow initialized the logger.
pub fn global_registry() -> &'static SecretRegistry {
    GLOBAL_SECRET_REGISTRY.get_or_init(SecretRegistry::new)
}

/// Secret values are only registered if at least this long, to avoid a
/// short common substring (e.g. an empty string or a single digit) from
/// redacting unrelated log content.
const MIN_SECRET_LEN: usize = 6;

/// Shared, mutable set of known secret values, cloned cheaply (an `Arc`
/// around the actual set) so the executor and the logging layer see the
/// same registrations.
#[derive(Clone, Default)]
pub struct SecretRegistry(Arc<RwLock<BTreeSet<String>>>);

impl SecretRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single secret value for redaction.
    pub fn register(&self, value: &str) {
        if value.len() >= MIN_SECRET_LEN {
            if let Ok(mut set) = self.0.write() {
                set.insert(value.to_string());
            }
        }
    }

    /// Register every string value reachable from a `secrets` namespace
    /// map, recursing into nested sequences/mappings.
    pub fn register_scope(&self, secrets: &std::collections::BTreeMap<String, Value>) {
        for value in secrets.values() {
            self.register_value(value);
        }
    }

    fn register_value(&self, value: &Value) {
        match value {
            Value::String(s) => self.register(s),
            Value::Sequence(items) => items.iter().for_each(|v| self.register_value(v)),
            Value::Mapping(map) => map.values().for_each(|v| self.register_value(v)),
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
    }

    /// Replace every known secret value appearing verbatim in `message`.
    #[must_use]
    pub fn scrub(&self, message: &str) -> String {
        let Ok(set) = self.0.read() else {
            return message.to_string();
        };
        let mut scrubbed = message.to_string();
        for secret in set.iter() {
            if scrubbed.contains(secret.as_str()) {
                scrubbed = scrubbed.replace(secret.as_str(), "[SECRET_REDACTED]");
            }
        }
        scrubbed
    }
}

impl fmt::Debug for SecretRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.0.read().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("SecretRegistry").field("registered", &len).finish()
    }
}

/// Layer that scrubs sensitive data from log messages using a shared
/// [`SecretRegistry`]. As with the teacher's layer, the actual redaction is
/// applied at the formatter/writer boundary via [`SecretRegistry::scrub`];
/// the `Layer` impl itself stays minimal.
#[derive(Clone, Debug)]
pub struct SecretScrubbingLayer {
    registry: SecretRegistry,
}

impl SecretScrubbingLayer {
    #[must_use]
    pub fn new(registry: SecretRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn scrub_message(&self, message: &str) -> String {
        self.registry.scrub(message)
    }
}

impl<S: Subscriber> Layer<S> for SecretScrubbingLayer {
    // Intentionally minimal: the scrubbing is applied by callers of
    // `scrub_message` (e.g. a custom event formatter), not by intercepting
    // every event here.
}

/// Wraps an inner [`MakeWriter`] so every byte written passes through
/// [`SecretRegistry::scrub`] first. Used to make the file/stdout layers in
/// `logger.rs` actually redact, rather than leaving the scrubbing layer
/// constructed but disconnected from the subscriber graph.
#[derive(Clone)]
pub struct ScrubbingMakeWriter<M> {
    inner: M,
    registry: SecretRegistry,
}

impl<M> ScrubbingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M, registry: SecretRegistry) -> Self {
        Self { inner, registry }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for ScrubbingMakeWriter<M> {
    type Writer = ScrubbingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        ScrubbingWriter { inner: self.inner.make_writer(), registry: self.registry.clone() }
    }
}

pub struct ScrubbingWriter<W> {
    inner: W,
    registry: SecretRegistry,
}

impl<W: io::Write> io::Write for ScrubbingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let scrubbed = self.registry.scrub(&String::from_utf8_lossy(buf));
        self.inner.write_all(scrubbed.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_secret_is_redacted() {
        let registry = SecretRegistry::new();
        registry.register("sk-ant-super-secret-value");
        let layer = SecretScrubbingLayer::new(registry);
        let scrubbed = layer.scrub_message("using key sk-ant-super-secret-value for request");
        assert!(!scrubbed.contains("sk-ant-super-secret-value"));
        assert!(scrubbed.contains("[SECRET_REDACTED]"));
    }

    #[test]
    fn short_values_are_not_registered() {
        let registry = SecretRegistry::new();
        registry.register("abc");
        assert_eq!(registry.scrub("abc appears here"), "abc appears here");
    }

    #[test]
    fn register_scope_walks_nested_values() {
        let mut secrets = std::collections::BTreeMap::new();
        secrets.insert(
            "db".to_string(),
            Value::Mapping(
                [("password".to_string(), Value::String("hunter2-but-longer".to_string()))]
                    .into_iter()
                    .collect(),
            ),
        );
        let registry = SecretRegistry::new();
        registry.register_scope(&secrets);
        let scrubbed = registry.scrub("connection string uses hunter2-but-longer as password");
        assert!(!scrubbed.contains("hunter2-but-longer"));
    }

    #[test]
    fn no_registered_secrets_leaves_message_unchanged() {
        let registry = SecretRegistry::new();
        let message = "this is a normal log line";
        assert_eq!(registry.scrub(message), message);
    }

    #[test]
    fn scrubbing_writer_redacts_before_reaching_the_inner_sink() {
        let registry = SecretRegistry::new();
        registry.register("super-secret-api-key");
        let mut writer = ScrubbingWriter { inner: Vec::new(), registry };
        io::Write::write_all(&mut writer, b"authorization: super-secret-api-key\n").unwrap();
        let written = String::from_utf8(writer.inner).unwrap();
        assert!(!written.contains("super-secret-api-key"));
        assert!(written.contains("[SECRET_REDACTED]"));
    }

    #[test]
    fn global_registry_is_a_single_shared_instance() {
        global_registry().register("process-wide-shared-secret-value");
        assert!(global_registry().scrub("process-wide-shared-secret-value").contains("[SECRET_REDACTED]"));
    }
}
