//! Artifact Store: content-addressed blob storage, keyed by hex
//! digest, backed by `object_store` so the local filesystem and an
//! S3-compatible provider share one code path.

use std::path::Path as FsPath;
use std::sync::Arc;
use std::time::Duration;

use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as StoragePath;
use object_store::{ObjectStore, PutPayload};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub key: String,
    pub etag: Option<String>,
    pub size: usize,
}

/// The blob ops retry schedule: 3 attempts, 1/2/4-second waits.
const RETRY_DELAYS_MS: [u64; 2] = [1000, 2000];
const RETRY_ATTEMPTS: u32 = 3;

async fn with_retry<T, F, Fut>(operation: &str, key: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < RETRY_ATTEMPTS => {
                let delay = RETRY_DELAYS_MS[(attempt - 1) as usize];
                warn!(operation, key, attempt, error = %err, "retrying after backoff");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Content-addressed object store wrapping an `object_store::ObjectStore`.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: String) -> Self {
        Self { store, bucket }
    }

    /// Local filesystem backend, rooted at `root` (created if absent).
    pub fn local(root: &FsPath, bucket: String) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let store = LocalFileSystem::new_with_prefix(root)
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        Ok(Self {
            store: Arc::new(store),
            bucket,
        })
    }

    /// S3-compatible backend (e.g. MinIO).
    pub fn s3(
        bucket: String,
        endpoint: Option<&str>,
        region: &str,
        access_key: &str,
        secret_key: &str,
        use_tls: bool,
    ) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&bucket)
            .with_region(region)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_allow_http(!use_tls);

        if let Some(endpoint) = endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        Ok(Self {
            store: Arc::new(store),
            bucket,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
            bucket: "malscan-local".to_string(),
        }
    }

    /// `put` — idempotent by key; the same digest re-put with the same
    /// bytes succeeds silently (content-addressing means the bytes are
    /// necessarily identical for a given key).
    pub async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<UploadMetadata> {
        let path = StoragePath::from(key);
        let size = data.len();
        let content_type = content_type.to_string();

        let put_result = with_retry("put", key, || {
            let path = path.clone();
            let payload = PutPayload::from(data.clone());
            let content_type = content_type.clone();
            async move {
                self.store
                    .put_opts(
                        &path,
                        payload,
                        object_store::PutOptions {
                            attributes: object_store::Attributes::from_iter([(
                                object_store::Attribute::ContentType,
                                content_type.into(),
                            )]),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| StorageError::UploadFailed(e.to_string()))
            }
        })
        .await?;

        info!(key, size, "stored artifact");

        Ok(UploadMetadata {
            key: key.to_string(),
            etag: put_result.e_tag,
            size,
        })
    }

    /// `get` — fetches the full blob into a local file for stage
    /// consumption (stages expect a local path, not a buffer).
    pub async fn get_to_path(&self, key: &str, dest: &FsPath) -> Result<()> {
        let path = StoragePath::from(key);

        let bytes = with_retry("get", key, || {
            let path = path.clone();
            async move {
                let result = self.store.get(&path).await.map_err(|e| match e {
                    object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
                    other => StorageError::DownloadFailed(other.to_string()),
                })?;
                result
                    .bytes()
                    .await
                    .map_err(|e| StorageError::DownloadFailed(e.to_string()))
            }
        })
        .await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        info!(key, size = bytes.len(), dest = %dest.display(), "fetched artifact");
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let store = ArtifactStore::in_memory();
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("blob.bin");

        store
            .put("deadbeef", b"hello".to_vec(), "application/octet-stream")
            .await
            .unwrap();
        store.get_to_path("deadbeef", &dest).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = ArtifactStore::in_memory();
        let dir = tempfile::TempDir::new().unwrap();
        let dest = dir.path().join("blob.bin");

        let err = store.get_to_path("missing", &dest).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn exists_reflects_put() {
        let store = ArtifactStore::in_memory();
        assert!(!store.exists("deadbeef").await.unwrap());
        store
            .put("deadbeef", b"hello".to_vec(), "application/octet-stream")
            .await
            .unwrap();
        assert!(store.exists("deadbeef").await.unwrap());
    }
}
