use super::models::{Config, StorageProvider};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("storage provider is s3 but missing credentials (access_key or secret_key)")]
    MissingS3Credentials,

    #[error("limits.max_file_size must be positive")]
    InvalidMaxFileSize,

    #[error("pipeline.stages_total must be positive")]
    InvalidStagesTotal,

    #[error("pipeline.stages_total ({configured}) does not match the declared stage list ({actual})")]
    StagesTotalMismatch { configured: u32, actual: u32 },

    #[error("pipeline.stage_timeout_seconds must be positive")]
    InvalidStageTimeout,

    #[error("server.cors_origins must not be empty")]
    EmptyCorsOrigins,
}

/// Validate the entire configuration.
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_storage(config)?;
    validate_limits(config)?;
    validate_pipeline(config)?;
    validate_server(config)?;
    Ok(())
}

fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::S3
        && (config.storage.access_key.is_none() || config.storage.secret_key.is_none())
    {
        return Err(ValidationError::MissingS3Credentials);
    }
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), ValidationError> {
    if config.limits.max_file_size.as_u64() == 0 {
        return Err(ValidationError::InvalidMaxFileSize);
    }
    Ok(())
}

fn validate_pipeline(config: &Config) -> Result<(), ValidationError> {
    if config.pipeline.stages_total == 0 {
        return Err(ValidationError::InvalidStagesTotal);
    }
    if config.pipeline.stage_timeout_seconds == 0 {
        return Err(ValidationError::InvalidStageTimeout);
    }

    let actual = crate::pipeline::default_stages(&config.pipeline).len() as u32;
    if config.pipeline.stages_total != actual {
        return Err(ValidationError::StagesTotalMismatch {
            configured: config.pipeline.stages_total,
            actual,
        });
    }

    Ok(())
}

fn validate_server(config: &Config) -> Result<(), ValidationError> {
    if config.server.cors_origins.trim().is_empty() {
        return Err(ValidationError::EmptyCorsOrigins);
    }
    Ok(())
}
