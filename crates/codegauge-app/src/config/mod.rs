//! Configuration loading and defaults.
//!
//! Settings merge three layers: built-in defaults, an optional
//! `config/settings` file, and `CODEGAUGE__`-prefixed environment variables.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    DEFAULT_BATCH_DEADLINE_SECS, DEFAULT_CLASSIFIER_MODEL, DEFAULT_UNIT_TIMEOUT_SECS,
    MAX_CONCURRENT_UNITS,
};

const CONFIG_FILE: &str = "config/settings";
const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Root directory for blob storage, the job database, and the report
    /// database. Defaults to the platform data directory when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,
    #[serde(default = "default_unit_timeout_secs")]
    pub unit_timeout_secs: u64,
    #[serde(default = "default_batch_deadline_secs")]
    pub batch_deadline_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_units: default_max_concurrent_units(),
            unit_timeout_secs: default_unit_timeout_secs(),
            batch_deadline_secs: default_batch_deadline_secs(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_CLASSIFIER_MODEL.to_string()
}

fn default_requests_per_second() -> u32 {
    DEFAULT_REQUESTS_PER_SECOND
}

fn default_max_concurrent_units() -> usize {
    MAX_CONCURRENT_UNITS
}

fn default_unit_timeout_secs() -> u64 {
    DEFAULT_UNIT_TIMEOUT_SECS
}

fn default_batch_deadline_secs() -> u64 {
    DEFAULT_BATCH_DEADLINE_SECS
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix("CODEGAUGE").separator("__"));

    let cfg = builder.build()?.try_deserialize()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert!(cfg.storage.data_dir.is_none());
        assert_eq!(cfg.classifier.model, DEFAULT_CLASSIFIER_MODEL);
        assert_eq!(cfg.classifier.requests_per_second, 5);
        assert_eq!(cfg.limits.max_concurrent_units, MAX_CONCURRENT_UNITS);
        assert_eq!(cfg.limits.unit_timeout_secs, DEFAULT_UNIT_TIMEOUT_SECS);
        assert_eq!(cfg.limits.batch_deadline_secs, DEFAULT_BATCH_DEADLINE_SECS);
    }

    #[test]
    fn empty_sources_deserialize_to_defaults() {
        let cfg: AppConfig = Config::builder()
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize");
        assert_eq!(cfg.classifier.model, DEFAULT_CLASSIFIER_MODEL);
        assert_eq!(cfg.limits.max_concurrent_units, MAX_CONCURRENT_UNITS);
    }

    #[test]
    fn partial_section_keeps_field_defaults() {
        let cfg: AppConfig = Config::builder()
            .set_override("classifier.model", "gemini-2.5-pro")
            .expect("override")
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize");
        assert_eq!(cfg.classifier.model, "gemini-2.5-pro");
        assert_eq!(cfg.classifier.requests_per_second, 5);
    }
}
