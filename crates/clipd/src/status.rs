use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::debug;
use crate::error::QueryError;
use crate::job::JobView;
use crate::registry::JobRegistry;

/// Read side of the registry, with lazy eviction of expired terminal jobs.
///
/// A terminal job is evicted once `now - completed_at >= retention`,
/// whether or not it was read before. The read that evicts still returns
/// the final snapshot; later reads get `NotFound`.
#[derive(Debug, Clone)]
pub struct StatusReader {
    registry: Arc<JobRegistry>,
    retention: chrono::Duration,
}

impl StatusReader {
    pub fn new(registry: Arc<JobRegistry>, retention: chrono::Duration) -> Self {
        StatusReader { registry, retention }
    }

    pub fn get(&self, id: &str) -> Result<JobView, QueryError> {
        self.get_at(id, Utc::now())
    }

    /// `get` against an explicit clock
    pub fn get_at(&self, id: &str, now: DateTime<Utc>) -> Result<JobView, QueryError> {
        let job = self
            .registry
            .read(id)
            .ok_or_else(|| QueryError::NotFound(id.to_string()))?;

        if job.is_terminal() && self.registry.evict_if_stale(id, now, self.retention) {
            debug!("Job {}: evicted after retention window", id);
        }
        Ok(job.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use crate::registry::JobUpdate;
    use chrono::Duration;

    fn reader() -> (Arc<JobRegistry>, StatusReader) {
        let registry = Arc::new(JobRegistry::new());
        let reader = StatusReader::new(registry.clone(), Duration::seconds(30));
        (registry, reader)
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (_, reader) = reader();
        assert_eq!(reader.get("nope"), Err(QueryError::NotFound("nope".to_string())));
    }

    #[test]
    fn test_processing_job_is_never_evicted() {
        let (registry, reader) = reader();
        registry.create("a").unwrap();
        registry.update("a", JobUpdate::Progress(30));
        let later = Utc::now() + Duration::days(1);
        assert_eq!(reader.get_at("a", later).unwrap().progress, Some(30));
        assert!(reader.get_at("a", later).is_ok());
    }

    #[test]
    fn test_eviction_after_retention() {
        let (registry, reader) = reader();
        let t = Utc::now();
        registry.create("a").unwrap();
        registry.update_at("a", JobUpdate::Completed { artifact_url: "https://x/y.mp4".to_string() }, t);

        // Within the window the job stays readable
        let view = reader.get_at("a", t + Duration::seconds(10)).unwrap();
        assert_eq!(view.status, JobStatus::Completed);

        // The read at t+31s still sees the final state, then the record is gone
        let view = reader.get_at("a", t + Duration::seconds(31)).unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.artifact_url.as_deref(), Some("https://x/y.mp4"));

        assert_eq!(
            reader.get_at("a", t + Duration::seconds(32)),
            Err(QueryError::NotFound("a".to_string()))
        );
    }

    #[test]
    fn test_eviction_does_not_require_prior_read() {
        let (registry, reader) = reader();
        let t = Utc::now();
        registry.create("f").unwrap();
        registry.update_at("f", JobUpdate::Failed { message: "boom".to_string() }, t);

        let view = reader.get_at("f", t + Duration::seconds(45)).unwrap();
        assert_eq!(view.error_message.as_deref(), Some("boom"));
        assert!(reader.get_at("f", t + Duration::seconds(46)).is_err());
    }
}
