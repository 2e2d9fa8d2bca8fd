use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::config::ClipConfig;

/// Public job handle
pub type JobId = String;

/// Generate a fresh job id
pub fn new_job_id() -> JobId {
    Uuid::new_v4().to_string()
}

/// Externally visible job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Position of a job in the pipeline state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Record created, waiting for a worker slot
    Submitted,
    Probing,
    Transcoding,
    Publishing,
    Completed,
    Failed,
}

impl JobStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Completed | JobStage::Failed)
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStage::Submitted => "submitted",
            JobStage::Probing => "probing",
            JobStage::Transcoding => "transcoding",
            JobStage::Publishing => "publishing",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Output targets. Portrait 9:16 for short-form platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl Resolution {
    /// Accepts `720`, `720p`, `1080`, `1080p` (any case)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "720" | "720p" => Some(Resolution::P720),
            "1080" | "1080p" => Some(Resolution::P1080),
            _ => None,
        }
    }

    /// Target frame size as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::P720 => (720, 1280),
            Resolution::P1080 => (1080, 1920),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::P720 => f.write_str("720p"),
            Resolution::P1080 => f.write_str("1080p"),
        }
    }
}

/// Resolved submission parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobParams {
    pub trim_secs: u32,
    pub resolution: Resolution,
}

impl JobParams {
    /// Apply the default policy to raw request values.
    ///
    /// A missing or non-positive trim becomes `default_trim_secs`; an unknown
    /// resolution becomes `default_resolution`.
    pub fn resolve(trim: Option<i64>, resolution: Option<&str>, cfg: &ClipConfig) -> Self {
        let trim_secs = match trim {
            Some(t) if t > 0 => u32::try_from(t).unwrap_or(u32::MAX),
            _ => cfg.default_trim_secs,
        };
        let resolution = resolution
            .and_then(Resolution::parse)
            .unwrap_or(cfg.default_resolution);
        JobParams { trim_secs, resolution }
    }
}

/// A tracked conversion request
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub stage: JobStage,
    /// 0-100; 100 only once completed
    pub progress: u8,
    pub artifact_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set once, when the job enters a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in `processing` at 0%
    pub fn new(id: JobId) -> Self {
        Job {
            id,
            status: JobStatus::Processing,
            stage: JobStage::Submitted,
            progress: 0,
            artifact_url: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Project the record into its query response
    pub fn view(&self) -> JobView {
        JobView {
            status: self.status,
            progress: match self.status {
                JobStatus::Failed => None,
                _ => Some(self.progress),
            },
            artifact_url: self.artifact_url.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

/// Query response shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
