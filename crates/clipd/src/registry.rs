use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;
use thiserror::Error;
use crate::job::{Job, JobId, JobStage, JobStatus};

/// Highest progress a job may report before it is completed
pub const MAX_RUNNING_PROGRESS: u8 = 99;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("job id already registered: {0}")]
    Duplicate(JobId),
}

/// Partial update merged into an existing record
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Stage(JobStage),
    Progress(u8),
    Completed { artifact_url: String },
    Failed { message: String },
}

/// In-memory table of job records, the single source of truth for job state.
///
/// Every call on one id is atomic: the shard lock is held for the call and
/// never across an await. Unrelated ids land on independent shards.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh `processing` record
    pub fn create(&self, id: &str) -> Result<(), RegistryError> {
        match self.jobs.entry(id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Job::new(id.to_string()));
                Ok(())
            }
        }
    }

    /// Merge an update into a record.
    ///
    /// Returns `false` when nothing changed: the id is unknown (e.g. already
    /// evicted) or the record is terminal.
    pub fn update(&self, id: &str, update: JobUpdate) -> bool {
        self.update_at(id, update, Utc::now())
    }

    pub(crate) fn update_at(&self, id: &str, update: JobUpdate, now: DateTime<Utc>) -> bool {
        let Some(mut job) = self.jobs.get_mut(id) else {
            debug!("Job {}: dropping update for unknown id", id);
            return false;
        };
        if job.is_terminal() {
            debug!("Job {}: ignoring {:?} after terminal state", id, update);
            return false;
        }

        match update {
            JobUpdate::Stage(stage) => {
                if stage.is_terminal() {
                    // Terminal stages only arrive with their payload
                    return false;
                }
                job.stage = stage;
            }
            JobUpdate::Progress(pct) => {
                job.progress = pct.min(MAX_RUNNING_PROGRESS);
            }
            JobUpdate::Completed { artifact_url } => {
                job.status = JobStatus::Completed;
                job.stage = JobStage::Completed;
                job.progress = 100;
                job.artifact_url = Some(artifact_url);
                job.completed_at = Some(now);
            }
            JobUpdate::Failed { message } => {
                job.status = JobStatus::Failed;
                job.stage = JobStage::Failed;
                job.error_message = Some(message);
                job.completed_at = Some(now);
            }
        }
        true
    }

    /// Snapshot of the latest committed record
    pub fn read(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|job| job.clone())
    }

    /// Remove a terminal record older than `retention`. Returns whether it was removed.
    pub fn evict_if_stale(&self, id: &str, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.jobs
            .remove_if(id, |_, job| is_stale(job, now, retention))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

fn is_stale(job: &Job, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
    match (job.is_terminal(), job.completed_at) {
        (true, Some(done)) => now - done >= retention,
        _ => false,
    }
}
