use std::sync::Arc;
use chrono::Utc;
use dashmap::DashMap;
use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use crate::config::ClipConfig;
use crate::error::{JobError, QueryError, SubmitError};
use crate::job::{new_job_id, JobId, JobParams, JobStage, JobView};
use crate::probe::probe_duration;
use crate::publish::{artifact_name, object_key, publish};
use crate::registry::{JobRegistry, JobUpdate};
use crate::scratch::{stage_upload, ScratchFile, Upload};
use crate::status::StatusReader;
use crate::storage::ArtifactStore;
use crate::transcode::{run_transcode, ProgressSink, TranscodeRequest};

/// Owns the registry and every in-flight job pipeline.
///
/// Each job runs as its own task: permit, probe, transcode, publish, then
/// the terminal write. Jobs waiting for a permit stay `processing` at 0%.
/// Scratch files are released before the terminal write, so a caller that
/// observes a terminal status never sees leftover files.
#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: ClipConfig,
    registry: Arc<JobRegistry>,
    store: Arc<dyn ArtifactStore>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    cancel_tokens: DashMap<JobId, CancellationToken>,
    tasks: TaskTracker,
}

/// Everything one pipeline run needs
struct JobContext {
    id: JobId,
    params: JobParams,
    input: ScratchFile,
    output: ScratchFile,
    object_key: String,
    cancel: CancellationToken,
}

impl JobCoordinator {
    pub fn new(cfg: ClipConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_jobs.max(1)));
        JobCoordinator {
            inner: Arc::new(Inner {
                cfg,
                registry: Arc::new(JobRegistry::new()),
                store,
                permits,
                shutdown: CancellationToken::new(),
                cancel_tokens: DashMap::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClipConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> Arc<JobRegistry> {
        self.inner.registry.clone()
    }

    /// Read handle for status queries
    pub fn status(&self) -> StatusReader {
        StatusReader::new(self.inner.registry.clone(), self.inner.cfg.retention())
    }

    pub fn query(&self, id: &str) -> Result<JobView, QueryError> {
        self.status().get(id)
    }

    /// Number of pipelines not yet finished
    pub fn in_flight(&self) -> usize {
        self.inner.cancel_tokens.len()
    }

    /// Accept an upload and start its pipeline in the background.
    ///
    /// Returns as soon as the job record exists; the caller polls `query`.
    pub async fn submit(&self, upload: Upload, params: JobParams) -> Result<JobId, SubmitError> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(SubmitError::ShuttingDown);
        }

        let size = upload.len().await?;
        if size == 0 {
            return Err(SubmitError::EmptyUpload);
        }
        if size > inner.cfg.max_upload_bytes {
            return Err(SubmitError::TooLarge { size, max: inner.cfg.max_upload_bytes });
        }

        let id = new_job_id();
        let submitted_at = Utc::now();
        let input = stage_upload(&inner.cfg.uploads_dir(), &id, upload).await?;
        inner.registry.create(&id)?;

        let cancel = inner.shutdown.child_token();
        inner.cancel_tokens.insert(id.clone(), cancel.clone());

        let ctx = JobContext {
            id: id.clone(),
            params,
            input,
            output: ScratchFile::new(inner.cfg.converted_dir().join(artifact_name(submitted_at, &id))),
            object_key: object_key(&inner.cfg.key_prefix, submitted_at, &id),
            cancel,
        };
        inner.tasks.spawn(run_job(self.inner.clone(), ctx));

        info!(
            "Job {}: submitted ({} bytes, trim {}s, {})",
            id, size, params.trim_secs, params.resolution
        );
        Ok(id)
    }

    /// Cancel a running job. Returns false if it is unknown or already finished.
    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.cancel_tokens.get(id) {
            Some(token) => {
                info!("Job {}: cancellation requested", id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight job and wait for their pipelines to wind down
    pub async fn shutdown(&self) {
        info!("Shutting down: cancelling {} in-flight job(s)", self.in_flight());
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

async fn run_job(inner: Arc<Inner>, ctx: JobContext) {
    let id = ctx.id.clone();

    // The body runs in its own task so a panic becomes a failed job
    let pipeline = tokio::spawn(run_pipeline(inner.clone(), ctx));
    let result = match pipeline.await {
        Ok(result) => result,
        Err(e) => Err(JobError::Internal(format!("pipeline task failed: {}", e))),
    };

    match result {
        Ok(artifact_url) => {
            info!("✅ Job {} completed: {}", id, artifact_url);
            inner.registry.update(&id, JobUpdate::Completed { artifact_url });
        }
        Err(e) => {
            error!("❌ Job {} failed: {}", id, e);
            inner.registry.update(&id, JobUpdate::Failed { message: e.to_string() });
        }
    }
    inner.cancel_tokens.remove(&id);
}

/// Run the stages, then release both scratch files whatever the outcome
async fn run_pipeline(inner: Arc<Inner>, ctx: JobContext) -> Result<String, JobError> {
    let result = execute(&inner, &ctx).await;
    ctx.input.release().await;
    ctx.output.release().await;
    result
}

async fn execute(inner: &Inner, ctx: &JobContext) -> Result<String, JobError> {
    let cfg = &inner.cfg;
    let id = ctx.id.as_str();

    let _permit = tokio::select! {
        permit = inner.permits.clone().acquire_owned() => {
            permit.map_err(|_| JobError::Internal("worker pool closed".to_string()))?
        }
        _ = ctx.cancel.cancelled() => return Err(JobError::Cancelled),
    };

    set_stage(inner, id, JobStage::Probing);
    info!("Job {}: probing duration of {}", id, ctx.input.path().display());
    let probed_secs = probe_duration(cfg, ctx.input.path(), &ctx.cancel).await?;
    info!("Job {}: source duration {:.2}s", id, probed_secs);

    set_stage(inner, id, JobStage::Transcoding);
    if let Some(parent) = ctx.output.path().parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let req = TranscodeRequest {
        input: ctx.input.path().to_path_buf(),
        output: ctx.output.path().to_path_buf(),
        trim_secs: ctx.params.trim_secs,
        resolution: ctx.params.resolution,
        probed_secs,
    };
    info!(
        "Job {}: transcoding {:.2}s clip at {}",
        id,
        req.effective_duration(),
        req.resolution
    );
    let registry = inner.registry.clone();
    let sink_id = ctx.id.clone();
    let sink: ProgressSink = Arc::new(move |pct| {
        registry.update(&sink_id, JobUpdate::Progress(pct));
    });
    let outcome = run_transcode(cfg, &req, sink, &ctx.cancel).await?;
    info!(
        "Job {}: transcoded {:.2}s, last reported progress {}%",
        id, outcome.effective_secs, outcome.last_progress
    );

    set_stage(inner, id, JobStage::Publishing);
    info!("Job {}: publishing {}", id, ctx.object_key);
    let upload = publish(inner.store.as_ref(), ctx.output.path(), &ctx.object_key);
    tokio::select! {
        res = tokio::time::timeout(cfg.publish_timeout(), upload) => match res {
            Ok(url) => url,
            Err(_) => Err(JobError::Timeout { stage: "publish", secs: cfg.publish_timeout_secs }),
        },
        _ = ctx.cancel.cancelled() => Err(JobError::Cancelled),
    }
}

fn set_stage(inner: &Inner, id: &str, stage: JobStage) {
    if !inner.registry.update(id, JobUpdate::Stage(stage)) {
        warn!("Job {}: record missing while entering {}", id, stage);
    }
}
