use anyhow::{Context, Result};
use clap::Parser;
use clipd::{
    config::ClipConfig,
    scratch::sweep_orphans,
    storage, JobCoordinator, JobId, JobParams, JobStatus, JobView, Upload,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use log::{info, warn, error};

/// Trim, scale and publish video clips
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Clip length in seconds; zero, negative or absent uses the configured default
    #[arg(short, long)]
    trim: Option<i64>,

    /// Output resolution: 720p or 1080p
    #[arg(short, long)]
    resolution: Option<String>,

    /// Status poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Print final job states as JSON
    #[arg(long)]
    json: bool,

    /// Video files to convert
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; --verbose only raises the default
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    );
    logger.format_timestamp_secs().init();

    let cfg = ClipConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("clipd starting");
    info!("  Work dir: {}", cfg.work_dir.display());
    info!("  ffmpeg: {}", cfg.ffmpeg_bin.display());
    info!("  Max concurrent jobs: {}", cfg.max_concurrent_jobs);
    info!("  Retention: {}s", cfg.retention_secs);

    let swept = sweep_orphans(&[cfg.uploads_dir(), cfg.converted_dir()])
        .context("Failed to clean scratch directories")?;
    if swept > 0 {
        info!("🧹 Removed {} orphaned scratch file(s)", swept);
    }

    let store = storage::from_config(&cfg.storage)
        .await
        .context("Failed to initialize artifact store")?;
    info!("Artifact store: {}", store.name());

    let params = JobParams::resolve(args.trim, args.resolution.as_deref(), &cfg);
    let coordinator = JobCoordinator::new(cfg, store);

    let mut pending: HashMap<JobId, PathBuf> = HashMap::new();
    let mut rejected = 0usize;
    for input in &args.inputs {
        match coordinator.submit(Upload::File(input.clone()), params).await {
            Ok(id) => {
                info!("Submitted {} as job {}", input.display(), id);
                pending.insert(id, input.clone());
            }
            Err(e) => {
                error!("Rejected {}: {}", input.display(), e);
                rejected += 1;
            }
        }
    }

    let finished = tokio::select! {
        finished = poll_until_done(&coordinator, pending, Duration::from_millis(args.poll_ms.max(10))) => finished,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling jobs");
            coordinator.shutdown().await;
            return Err(anyhow::anyhow!("interrupted"));
        }
    };
    coordinator.shutdown().await;

    let failed = rejected + finished.iter().filter(|(_, v)| v.status == JobStatus::Failed).count();
    if args.json {
        let report: Vec<_> = finished
            .iter()
            .map(|(input, view)| serde_json::json!({ "input": input, "job": view }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for (input, view) in &finished {
            match view.status {
                JobStatus::Completed => println!(
                    "{}: {}",
                    input.display(),
                    view.artifact_url.as_deref().unwrap_or("")
                ),
                _ => println!(
                    "{}: failed: {}",
                    input.display(),
                    view.error_message.as_deref().unwrap_or("unknown error")
                ),
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} input(s) failed", failed, args.inputs.len());
    }
    Ok(())
}

/// Poll every job until it reaches a terminal state
async fn poll_until_done(
    coordinator: &JobCoordinator,
    mut pending: HashMap<JobId, PathBuf>,
    interval: Duration,
) -> Vec<(PathBuf, JobView)> {
    let mut finished = Vec::new();
    let mut last_progress: HashMap<JobId, u8> = HashMap::new();

    while !pending.is_empty() {
        tokio::time::sleep(interval).await;

        let mut done = Vec::new();
        for (id, input) in &pending {
            match coordinator.query(id) {
                Ok(view) if view.status.is_terminal() => {
                    done.push(id.clone());
                    finished.push((input.clone(), view));
                }
                Ok(view) => {
                    let pct = view.progress.unwrap_or(0);
                    if last_progress.insert(id.clone(), pct) != Some(pct) {
                        info!("Job {}: {}%", id, pct);
                    }
                }
                Err(e) => {
                    // Only possible if polling fell behind the retention window
                    warn!("Job {}: {}", id, e);
                    done.push(id.clone());
                }
            }
        }
        for id in done {
            pending.remove(&id);
        }
    }
    finished
}
