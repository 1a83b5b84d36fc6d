//! Configuration Loader
//!
//! Environment-aware loading on top of the `config` crate: built-in defaults,
//! then the base TOML file, then the per-environment TOML file, then
//! `FOREMAN__*` environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::ForemanConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const CONFIG_PATH_VAR: &str = "FOREMAN_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "config/foreman.toml";
const ENV_PREFIX: &str = "FOREMAN";
const ENV_SEPARATOR: &str = "__";

/// Loaded and validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: ForemanConfig,
    environment: String,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let config_file = env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from_file(config_file, &detect_environment())
    }

    /// Load from an explicit base file and environment name. Both files are
    /// optional; process environment variables still apply.
    pub fn load_from_file(
        config_file: impl Into<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_file.into(), environment, None)
    }

    /// Like [`ConfigManager::load_from_file`], reading `FOREMAN__*` overrides
    /// from `overrides` instead of the process environment
    pub fn load_with_overrides(
        config_file: impl Into<PathBuf>,
        environment: &str,
        overrides: config::Map<String, String>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::build(config_file.into(), environment, Some(overrides))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: ForemanConfig, environment: &str) -> ConfigResult<ConfigManager> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
        })
    }

    fn build(
        config_file: PathBuf,
        environment: &str,
        overrides: Option<config::Map<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let env_file = environment_file(&config_file, environment);

        debug!(
            environment = %environment,
            config_file = %config_file.display(),
            env_file = %env_file.display(),
            "Loading configuration"
        );

        let defaults = Config::try_from(&ForemanConfig::default())?;

        let mut env_source = Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true);
        if overrides.is_some() {
            env_source = env_source.source(overrides);
        }

        let config: ForemanConfig = Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_file.clone()).required(false))
            .add_source(File::from(env_file).required(false))
            .add_source(env_source)
            .build()?
            .try_deserialize()?;

        config.validate()?;

        tracing::info!(
            environment = %environment,
            redis_url = %crate::messaging::providers::redis_streams::redact_url(&config.redis.url),
            database = config.database.url.is_some(),
            phases = config.orchestrator.phases.len(),
            event_rules = config.scheduler.event_rules.len(),
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ForemanConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }
}

/// `FOREMAN_ENV`, then `APP_ENV`, then `development`
pub fn detect_environment() -> String {
    env::var("FOREMAN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// `config/foreman.toml` + `test` → `config/foreman.test.toml`
fn environment_file(config_file: &Path, environment: &str) -> PathBuf {
    let stem = config_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("foreman");
    let extension = config_file
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("toml");
    config_file.with_file_name(format!("{stem}.{environment}.{extension}"))
}
