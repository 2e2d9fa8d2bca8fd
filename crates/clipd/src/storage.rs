use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use log::{debug, info};
use thiserror::Error;
use crate::config::StorageConfig;
use crate::s3::S3Store;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to configure storage client: {0}")]
    ConfigError(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }
}

/// Stores bytes under a key and hands back a retrievable address
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        disposition_filename: &str,
    ) -> StorageResult<String>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Build the store described by the configuration
pub async fn from_config(cfg: &StorageConfig) -> StorageResult<Arc<dyn ArtifactStore>> {
    match cfg {
        StorageConfig::Local { root, public_base_url } => {
            Ok(Arc::new(LocalStore::new(root.clone(), public_base_url.clone())))
        }
        StorageConfig::S3 { .. } => Ok(Arc::new(S3Store::from_config(cfg).await?)),
    }
}

/// Reject keys that could escape the bucket/root or address nothing
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Join a base URL and an object key with exactly one slash
pub fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Artifacts written to a local directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalStore {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> Self {
        LocalStore { root, public_base_url }
    }

    /// Address of a stored key
    pub fn public_url(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => join_url(base, key),
            None => format!("file://{}", self.root.join(key).display()),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        disposition_filename: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        let path = self.root.join(key);
        debug!(
            "Writing {} bytes to {} (type {}, download as {})",
            bytes.len(),
            path.display(),
            content_type,
            disposition_filename
        );

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        info!("Stored {} at {}", key, path.display());
        Ok(self.public_url(key))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
