use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use super::EngineConfig;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid default_concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("invalid default_step_timeout_ms: {0}. Must be positive")]
    InvalidStepTimeout(u64),

    #[error("invalid resolver_recursion_depth: {0}. Must be between 1 and 64")]
    InvalidRecursionDepth(u32),

    #[error("invalid event_bus_capacity: {0}. Must be at least 1")]
    InvalidEventBusCapacity(usize),

    #[error("invalid logging level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (`Serialized`)
    /// 2. `orbyt.yaml` (project config, optional)
    /// 3. Environment variables (`ORBYT_*` prefix, highest priority)
    pub fn load() -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file("orbyt.yaml"))
            .merge(Env::prefixed("ORBYT_").split("__"))
            .extract()
            .context("failed to extract engine configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, skipping environment merge.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<EngineConfig> {
        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load engine config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
        if config.default_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(config.default_concurrency));
        }
        if config.default_step_timeout_ms == 0 {
            return Err(ConfigError::InvalidStepTimeout(config.default_step_timeout_ms));
        }
        if config.resolver_recursion_depth == 0 || config.resolver_recursion_depth > 64 {
            return Err(ConfigError::InvalidRecursionDepth(config.resolver_recursion_depth));
        }
        if config.event_bus_capacity == 0 {
            return Err(ConfigError::InvalidEventBusCapacity(config.event_bus_capacity));
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.default_concurrency, 4);
        assert_eq!(config.resolver_recursion_depth, 10);
        ConfigLoader::validate(&config).expect("default config should be valid");
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = EngineConfig::default();
        config.default_concurrency = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidConcurrency(0))));
    }

    #[test]
    fn validate_rejects_excessive_recursion_depth() {
        let mut config = EngineConfig::default();
        config.resolver_recursion_depth = 100;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidRecursionDepth(100))));
    }

    #[test]
    fn validate_rejects_invalid_log_level() {
        let mut config = EngineConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidLogLevel(_))));
    }

    #[test]
    fn env_override_takes_precedence() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ORBYT_DEFAULT_CONCURRENCY", "16");
            let config: EngineConfig = Figment::new()
                .merge(Serialized::defaults(EngineConfig::default()))
                .merge(Env::prefixed("ORBYT_").split("__"))
                .extract()
                .unwrap();
            assert_eq!(config.default_concurrency, 16);
            Ok(())
        });
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_concurrency: 8\nresolver_recursion_depth: 5").unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.default_concurrency, 8);
        assert_eq!(config.resolver_recursion_depth, 5);
    }
}
