//! Layered configuration.
//!
//! Settings are assembled from three sources, in increasing priority:
//! 1. Defaults (embedded in each section's `Default` impl)
//! 2. An optional TOML file (`MALSCAN_CONFIG`, default `config/malscan.toml`)
//! 3. Environment variables (`MALSCAN__SECTION__KEY`, highest priority)
//!
//! ```no_run
//! use malscan::config::Config;
//!
//! let config = Config::load().expect("failed to load configuration");
//! println!("listening on {}", config.server.bind_addr);
//! ```

mod models;
mod sources;
mod validation;

pub use models::{
    Config, LimitsConfig, LogFormat, PipelineConfig, QueueConfig, RegistryConfig, ServerConfig,
    StorageConfig, StorageProvider, TelemetryConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment).
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, bypassing `MALSCAN_CONFIG`.
    /// Useful for tests with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[pipeline]\nstage_timeout_seconds = 60\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.pipeline.stage_timeout_seconds, 60);
    }

    #[test]
    fn test_validation_runs_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[pipeline]\nstages_total = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result,
            Err(ConfigError::ValidationError(ValidationError::InvalidStagesTotal))
        ));
    }
}
