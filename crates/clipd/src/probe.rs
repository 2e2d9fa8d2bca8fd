use std::path::Path;
use std::process::Stdio;
use log::debug;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use crate::config::ClipConfig;
use crate::error::JobError;
use crate::progress::parse_duration_token;

/// Argument vector for metadata inspection of `input`
pub fn probe_args(input: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-i".to_string(),
        input.display().to_string(),
    ]
}

/// Determine the playable duration of `input` in seconds.
///
/// `ffmpeg -i` without an output always exits non-zero, so the exit status is
/// not checked; only the `Duration:` token in the diagnostics decides.
pub async fn probe_duration(cfg: &ClipConfig, input: &Path, cancel: &CancellationToken) -> Result<f64, JobError> {
    if !input.exists() {
        return Err(JobError::probe(format!("input does not exist: {}", input.display())));
    }

    let args = probe_args(input);
    debug!("Executing duration probe: {} {:?}", cfg.ffmpeg_bin.display(), args);

    let mut cmd = Command::new(&cfg.ffmpeg_bin);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Dropping the output future kills the child
    let output = tokio::select! {
        res = tokio::time::timeout(cfg.probe_timeout(), cmd.output()) => match res {
            Ok(out) => out.map_err(|e| JobError::probe(format!(
                "failed to run {}: {}", cfg.ffmpeg_bin.display(), e
            )))?,
            Err(_) => return Err(JobError::Timeout { stage: "duration probe", secs: cfg.probe_timeout_secs }),
        },
        _ = cancel.cancelled() => return Err(JobError::Cancelled),
    };

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!(
        "Duration probe exit code: {}, stderr length: {}",
        output.status.code().unwrap_or(-1),
        stderr.len()
    );

    let secs = parse_duration_token(&stderr)
        .or_else(|| parse_duration_token(&stdout))
        .ok_or_else(|| JobError::probe("no duration found in transcoder output"))?;

    if secs.is_nan() || secs <= 0.0 {
        return Err(JobError::probe(format!("source reports a duration of {}s", secs)));
    }
    Ok(secs)
}
