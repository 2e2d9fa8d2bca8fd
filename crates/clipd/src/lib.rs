pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod probe;
pub mod progress;
pub mod publish;
pub mod registry;
pub mod s3;
pub mod scratch;
pub mod status;
pub mod storage;
pub mod transcode;

#[cfg(all(test, unix))]
mod testutil;

pub use config::{ClipConfig, ProgressChannel, StorageConfig};
pub use coordinator::JobCoordinator;
pub use error::{JobError, QueryError, SubmitError};
pub use job::{Job, JobId, JobParams, JobStage, JobStatus, JobView, Resolution};
pub use scratch::Upload;
pub use status::StatusReader;
pub use storage::{ArtifactStore, LocalStore, StorageError};
