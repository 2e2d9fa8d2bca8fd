use thiserror::Error;
use crate::job::JobId;
use crate::registry::RegistryError;
use crate::storage::StorageError;

/// Failure inside one job's pipeline. The `Display` text becomes the
/// job's `errorMessage`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to determine video duration: {0}")]
    Probe(String),

    #[error("conversion failed: {reason}")]
    Transcode { reason: String, exit_code: Option<i32> },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("job cancelled")]
    Cancelled,

    #[error("failed to upload artifact: {0}")]
    Publish(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JobError {
    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    pub fn transcode(reason: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::Transcode { reason: reason.into(), exit_code }
    }
}

/// Rejected submissions
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("no file uploaded")]
    EmptyUpload,

    #[error("file too large: {size} bytes, max {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("failed to stage upload: {0}")]
    Staging(#[from] std::io::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("engine is shutting down")]
    ShuttingDown,
}

/// Failed status queries
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Job not found: {0}")]
    NotFound(JobId),
}
