use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            registry: RegistryConfig::default(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            limits: LimitsConfig::default(),
            pipeline: PipelineConfig::default(),
            telemetry: TelemetryConfig::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Comma-separated origin list; `*` (the default) is permissive CORS.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
    /// Number of in-process worker tasks the `api` subcommand starts
    /// alongside the HTTP server.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_origins: default_cors_origins(),
            workers: default_workers(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_cors_origins() -> String {
    "*".to_string()
}

fn default_workers() -> usize {
    1
}

/// Job Registry configuration. `fjall_path` points at the embedded
/// keyspace directory rather than a database URL — there is no separate
/// server process to address (see DESIGN.md).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub fjall_path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            fjall_path: default_registry_path(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("data/registry")
}

/// Storage provider selector for the Artifact Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Local,
    S3,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    pub endpoint: Option<String>,
    /// S3 credentials: environment-only, never read from the TOML file.
    #[serde(skip)]
    pub access_key: Option<String>,
    #[serde(skip)]
    pub secret_key: Option<String>,
    pub region: Option<String>,
    #[serde(default = "default_use_tls")]
    pub use_tls: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            root: default_storage_root(),
            bucket: default_bucket(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: None,
            use_tls: default_use_tls(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("data/artifacts")
}

fn default_bucket() -> String {
    "malscan-artifacts".to_string()
}

fn default_use_tls() -> bool {
    true
}

/// Job Queue Transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_path")]
    pub fjall_path: PathBuf,
    #[serde(default = "default_queue_name")]
    pub name: String,
    #[serde(default = "default_dlq_name")]
    pub dlq_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            fjall_path: default_queue_path(),
            name: default_queue_name(),
            dlq_name: default_dlq_name(),
        }
    }
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("data/queue")
}

fn default_queue_name() -> String {
    "malscan.jobs".to_string()
}

fn default_dlq_name() -> String {
    "malscan-dlq".to_string()
}

/// Submission limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: ByteSize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_max_file_size() -> ByteSize {
    ByteSize(20 * 1024 * 1024) // 20 MiB
}

/// Stage pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_stages_total")]
    pub stages_total: u32,
    #[serde(default = "default_stage_timeout_seconds")]
    pub stage_timeout_seconds: u64,
    #[serde(default = "default_yara_rules_dir")]
    pub yara_rules_dir: PathBuf,
    #[serde(default = "default_clamscan_path")]
    pub clamscan_path: PathBuf,
    #[serde(default = "default_sandbox_enabled")]
    pub sandbox_enabled: bool,
    #[serde(default = "default_sandbox_mock")]
    pub sandbox_mock: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages_total: default_stages_total(),
            stage_timeout_seconds: default_stage_timeout_seconds(),
            yara_rules_dir: default_yara_rules_dir(),
            clamscan_path: default_clamscan_path(),
            sandbox_enabled: default_sandbox_enabled(),
            sandbox_mock: default_sandbox_mock(),
        }
    }
}

fn default_stages_total() -> u32 {
    5
}

fn default_stage_timeout_seconds() -> u64 {
    300
}

fn default_yara_rules_dir() -> PathBuf {
    PathBuf::from("/etc/yara/rules")
}

fn default_clamscan_path() -> PathBuf {
    PathBuf::from("/usr/bin/clamscan")
}

fn default_sandbox_enabled() -> bool {
    true
}

fn default_sandbox_mock() -> bool {
    true
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: SocketAddr,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> SocketAddr {
    "0.0.0.0:9090".parse().unwrap()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.limits.max_file_size.as_u64(), 20 * 1024 * 1024);
        assert_eq!(config.pipeline.stages_total, 5);
        assert_eq!(config.pipeline.stage_timeout_seconds, 300);
        assert_eq!(config.queue.name, "malscan.jobs");
        assert_eq!(config.queue.dlq_name, "malscan-dlq");
    }
}
