//! Ambient engine configuration.
//!
//! `EngineConfig` carries process-wide settings that are not part of any
//! single workflow document: default step timeout, default retry policy,
//! default concurrency cap, the resolver's recursion-depth cap, the event
//! bus channel capacity, and logging configuration. Loaded hierarchically
//! via `figment`, mirroring the teacher's `infrastructure::config::ConfigLoader`.

mod loader;

pub use loader::{ConfigError, ConfigLoader};

use crate::domain::models::BackoffStrategy;
use crate::infrastructure::logging::LogConfig;
use serde::{Deserialize, Serialize};

/// Retry defaults applied to a step that declares `retry` without every
/// field, or to the engine's own internal retry-eligible operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub max: u32,
    pub backoff: BackoffStrategy,
    pub delay_ms: u64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self { max: 1, backoff: BackoffStrategy::Linear, delay_ms: 0 }
    }
}

/// Process-wide ambient settings (spec's `config::EngineConfig` addition).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    #[serde(default)]
    pub default_retry: RetryDefaults,

    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,

    /// Design target from spec §4.2: variable resolution recurses at most
    /// this many levels before raising a `Runtime` error.
    #[serde(default = "default_recursion_depth")]
    pub resolver_recursion_depth: u32,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            default_retry: RetryDefaults::default(),
            default_concurrency: default_concurrency(),
            resolver_recursion_depth: default_recursion_depth(),
            event_bus_capacity: default_event_bus_capacity(),
            logging: LogConfig::default(),
        }
    }
}

fn default_step_timeout_ms() -> u64 {
    30_000
}

fn default_concurrency() -> usize {
    4
}

fn default_recursion_depth() -> u32 {
    10
}

fn default_event_bus_capacity() -> usize {
    1024
}
