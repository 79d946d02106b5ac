use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MALSCAN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/malscan.toml";
const ENV_PREFIX: &str = "MALSCAN";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in struct `Default` impls)
/// 2. TOML file (if present)
/// 3. Environment variables (highest priority, `MALSCAN__SECTION__KEY`)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if present; ignore if absent.
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);
    Ok(config)
}

/// S3 credentials are environment-only, never read from the TOML file
/// (see the `storage.access_key`/`storage.secret_key` env override note).
fn load_secrets(config: &mut Config) {
    if let Ok(access_key) = env::var("MALSCAN_S3_ACCESS_KEY") {
        config.storage.access_key = Some(access_key);
    }
    if let Ok(secret_key) = env::var("MALSCAN_S3_SECRET_KEY") {
        config.storage.secret_key = Some(secret_key);
    }

    if config.storage.access_key.is_none() {
        if let Ok(access_key) = env::var("AWS_ACCESS_KEY_ID") {
            config.storage.access_key = Some(access_key);
        }
    }
    if config.storage.secret_key.is_none() {
        if let Ok(secret_key) = env::var("AWS_SECRET_ACCESS_KEY") {
            config.storage.secret_key = Some(secret_key);
        }
    }
}

/// Load configuration from a specific path. Useful for tests with custom
/// config files, and for `Config::load_from_path`.
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "loading configuration file");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            path = %config_path.display(),
            "no configuration file found, using defaults and environment overrides"
        );
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.pipeline.stages_total, 5);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[limits]
max_file_size = "10MB"

[pipeline]
stages_total = 3
stage_timeout_seconds = 60
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.limits.max_file_size.as_u64(), 10 * 1024 * 1024);
        assert_eq!(config.pipeline.stages_total, 3);
        assert_eq!(config.pipeline.stage_timeout_seconds, 60);
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
cors_origins = "https://a.example.com,https://b.example.com"
workers = 2

[registry]
fjall_path = "data/registry"

[storage]
provider = "s3"
bucket = "malscan-prod"
region = "us-east-1"
endpoint = "https://minio.internal:9000"
use_tls = true

[queue]
fjall_path = "data/queue"
name = "malscan.jobs"
dlq_name = "malscan-dlq"

[limits]
max_file_size = "20MB"

[pipeline]
stages_total = 5
stage_timeout_seconds = 300
yara_rules_dir = "/etc/yara/rules"
clamscan_path = "/usr/bin/clamscan"
sandbox_enabled = true
sandbox_mock = true

[telemetry]
metrics_addr = "0.0.0.0:9090"

log_level = "info"
log_format = "json"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();

        assert_eq!(config.server.workers, 2);
        assert_eq!(config.storage.provider, super::super::models::StorageProvider::S3);
        assert_eq!(config.storage.bucket, "malscan-prod");
        assert_eq!(config.queue.name, "malscan.jobs");
        assert_eq!(config.pipeline.sandbox_mock, true);
        assert_eq!(config.log_format, super::super::models::LogFormat::Json);
    }
}
