mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

use malscan::config::{Config, LogFormat, StorageProvider};
use malscan::observability::Metrics;
use malscan::queue::FjallQueue;
use malscan::registry::FjallRegistry;
use malscan::storage::ArtifactStore;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    let cli = Cli::parse();

    let config = Arc::new(Config::load().map_err(|err| format!("failed to load configuration: {err}"))?);
    init_tracing(&config.log_level, config.log_format);

    let registry = Arc::new(FjallRegistry::open(&config.registry.fjall_path)?);
    let storage = Arc::new(build_storage(&config)?);
    let metrics = Arc::new(Metrics::new());

    match cli.command {
        Commands::Api(args) => {
            let queue = Arc::new(
                malscan::worker::connect_queue(
                    &config.queue.fjall_path,
                    &config.queue.name,
                    &config.queue.dlq_name,
                )
                .await?,
            );
            let config = workers_override(config, args.workers);
            malscan::api::run(config, registry, storage, queue, metrics, !args.no_workers).await?;
        }
        Commands::Worker(args) => {
            let queue = Arc::new(
                malscan::worker::connect_queue(
                    &config.queue.fjall_path,
                    &config.queue.name,
                    &config.queue.dlq_name,
                )
                .await?,
            );
            let config = workers_override(config, args.workers);
            malscan::worker::run(config, registry, storage, queue, metrics).await?;
        }
    }

    Ok(())
}

fn workers_override(config: Arc<Config>, override_count: Option<usize>) -> Arc<Config> {
    match override_count {
        Some(count) => {
            let mut config = (*config).clone();
            config.server.workers = count;
            Arc::new(config)
        }
        None => config,
    }
}

fn build_storage(config: &Config) -> Result<ArtifactStore, AnyError> {
    match config.storage.provider {
        StorageProvider::Local => Ok(ArtifactStore::local(&config.storage.root, config.storage.bucket.clone())?),
        StorageProvider::S3 => {
            let access_key = config
                .storage
                .access_key
                .clone()
                .ok_or("S3 storage configured but no access key found (MALSCAN_S3_ACCESS_KEY)")?;
            let secret_key = config
                .storage
                .secret_key
                .clone()
                .ok_or("S3 storage configured but no secret key found (MALSCAN_S3_SECRET_KEY)")?;
            let region = config.storage.region.as_deref().unwrap_or("us-east-1");
            Ok(ArtifactStore::s3(
                config.storage.bucket.clone(),
                config.storage.endpoint.as_deref(),
                region,
                &access_key,
                &secret_key,
                config.storage.use_tls,
            )?)
        }
    }
}

fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
