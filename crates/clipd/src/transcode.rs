use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use crate::config::{ClipConfig, ProgressChannel};
use crate::error::JobError;
use crate::job::Resolution;
use crate::progress::{parse_marker, percent, LineBuffer};

/// Lines of diagnostics kept for failure messages
const STDERR_TAIL_LINES: usize = 20;

/// How long readers may keep draining after the child has exited
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Receives progress percentages in the order they are produced
pub type ProgressSink = Arc<dyn Fn(u8) + Send + Sync>;

/// One transcode invocation
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub trim_secs: u32,
    pub resolution: Resolution,
    /// Source duration from the probe
    pub probed_secs: f64,
}

impl TranscodeRequest {
    /// Never longer than the source
    pub fn effective_duration(&self) -> f64 {
        (self.trim_secs as f64).min(self.probed_secs)
    }
}

/// Last non-blank diagnostic line, skipping progress stats
fn last_diagnostic(tail: &[String]) -> Option<&str> {
    tail.iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty() && !l.starts_with("frame=") && parse_marker(l).is_none())
}

/// Successful transcode
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub effective_secs: f64,
    /// Last percentage reported before exit
    pub last_progress: u8,
}

/// Scale into the target box keeping aspect ratio, then pad to it exactly
pub fn filter_graph(resolution: Resolution) -> String {
    let (w, h) = resolution.dimensions();
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1"
    )
}

/// Build the ffmpeg argument vector. Every value is its own argument; no shell is involved.
pub fn build_args(cfg: &ClipConfig, req: &TranscodeRequest) -> Vec<String> {
    let mut args = Vec::new();

    args.push("-hide_banner".to_string());
    args.push("-nostdin".to_string());
    args.push("-y".to_string());

    args.push("-i".to_string());
    args.push(req.input.display().to_string());

    args.push("-t".to_string());
    args.push(format!("{:.3}", req.effective_duration()));

    args.push("-vf".to_string());
    args.push(filter_graph(req.resolution));

    args.push("-c:v".to_string());
    args.push(cfg.video_codec.clone());
    args.push("-preset".to_string());
    args.push(cfg.video_preset.clone());
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push("-c:a".to_string());
    args.push(cfg.audio_codec.clone());

    args.push("-movflags".to_string());
    args.push("+faststart".to_string());

    match cfg.progress_channel {
        ProgressChannel::Pipe => {
            args.push("-progress".to_string());
            args.push("pipe:1".to_string());
            args.push("-nostats".to_string());
        }
        ProgressChannel::Stderr => {
            args.push("-stats".to_string());
        }
    }

    args.push(req.output.display().to_string());
    args
}

/// Run the transcoder to completion, pushing progress into `sink`.
///
/// Returns exactly one outcome. Timeout and cancellation kill the child.
/// Every call to `sink` happens before this function returns.
pub async fn run_transcode(
    cfg: &ClipConfig,
    req: &TranscodeRequest,
    sink: ProgressSink,
    cancel: &CancellationToken,
) -> Result<TranscodeOutcome, JobError> {
    let effective = req.effective_duration();
    let args = build_args(cfg, req);
    debug!("Executing transcode: {} {:?}", cfg.ffmpeg_bin.display(), args);

    let mut child = Command::new(&cfg.ffmpeg_bin)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JobError::transcode(format!("failed to spawn {}: {}", cfg.ffmpeg_bin.display(), e), None))?;

    let stdout = child.stdout.take()
        .ok_or_else(|| JobError::transcode("failed to capture transcoder stdout", None))?;
    let stderr = child.stderr.take()
        .ok_or_else(|| JobError::transcode("failed to capture transcoder stderr", None))?;

    let parse_stdout = cfg.progress_channel == ProgressChannel::Pipe;
    let stdout_handle = tokio::spawn(drain_stream(stdout, effective, parse_stdout.then(|| sink.clone()), 0));
    let stderr_handle = tokio::spawn(drain_stream(stderr, effective, (!parse_stdout).then(|| sink.clone()), STDERR_TAIL_LINES));

    let waited = tokio::select! {
        res = tokio::time::timeout(cfg.transcode_timeout(), child.wait()) => match res {
            Ok(status) => Ok(status),
            Err(_) => Err(JobError::Timeout { stage: "transcode", secs: cfg.transcode_timeout_secs }),
        },
        _ = cancel.cancelled() => Err(JobError::Cancelled),
    };

    let status = match waited {
        Ok(status) => status,
        Err(e) => {
            kill_child(&mut child).await;
            // Stop the readers outright; no progress may land after this returns
            stdout_handle.abort();
            stderr_handle.abort();
            let _ = stdout_handle.await;
            let _ = stderr_handle.await;
            return Err(e);
        }
    };

    let stdout_report = join_drain(stdout_handle).await;
    let stderr_report = join_drain(stderr_handle).await;
    let last_progress = stdout_report.last_percent.max(stderr_report.last_percent);

    let status = status.map_err(|e| JobError::transcode(format!("failed to wait for transcoder: {}", e), None))?;
    if !status.success() {
        let exit_code = status.code();
        let tail: Vec<String> = stderr_report.tail.into_iter().collect();
        warn!("Transcoder exited with code {}: {}", exit_code.unwrap_or(-1), tail.join("\n"));
        let mut reason = match exit_code {
            Some(code) => format!("transcoder exit code {}", code),
            None => "transcoder terminated by signal".to_string(),
        };
        if let Some(line) = last_diagnostic(&tail) {
            reason.push_str(": ");
            reason.push_str(line);
        }
        return Err(JobError::transcode(reason, exit_code));
    }

    info!("Transcode completed successfully ({:.2}s clip)", effective);
    Ok(TranscodeOutcome { effective_secs: effective, last_progress })
}

async fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill transcoder process: {}", e);
    }
}

/// What a stream reader saw
#[derive(Debug, Default)]
struct DrainReport {
    last_percent: u8,
    tail: VecDeque<String>,
}

/// Wait for a reader, bounded by the drain grace period
async fn join_drain(mut handle: JoinHandle<DrainReport>) -> DrainReport {
    match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            warn!("Transcoder output reader failed: {}", e);
            DrainReport::default()
        }
        Err(_) => {
            // A grandchild may still hold the pipe open
            warn!("Transcoder output still open after exit; stopping reader");
            handle.abort();
            let _ = handle.await;
            DrainReport::default()
        }
    }
}

/// Read a stream until EOF, reporting progress markers and keeping a tail
async fn drain_stream<R>(mut reader: R, effective_secs: f64, sink: Option<ProgressSink>, keep_tail: usize) -> DrainReport
where
    R: AsyncRead + Unpin,
{
    let mut report = DrainReport::default();
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 8192];

    let handle_line = |line: String, report: &mut DrainReport| {
        if let Some(sink) = &sink {
            if let Some(elapsed) = parse_marker(&line) {
                let pct = percent(elapsed, effective_secs);
                report.last_percent = pct;
                sink(pct);
            }
        }
        if keep_tail > 0 {
            if report.tail.len() == keep_tail {
                report.tail.pop_front();
            }
            report.tail.push_back(line);
        }
    };

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    handle_line(line, &mut report);
                }
            }
            Err(e) => {
                debug!("Transcoder output read error: {}", e);
                break;
            }
        }
    }
    if let Some(line) = lines.finish() {
        handle_line(line, &mut report);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn request(trim: u32, probed: f64) -> TranscodeRequest {
        TranscodeRequest {
            input: PathBuf::from("/work/uploads/in.upload"),
            output: PathBuf::from("/work/converted/out.mp4"),
            trim_secs: trim,
            resolution: Resolution::P720,
            probed_secs: probed,
        }
    }

    #[test]
    fn test_effective_duration_examples() {
        assert_eq!(request(15, 10.0).effective_duration(), 10.0);
        assert_eq!(request(15, 60.0).effective_duration(), 15.0);
    }

    #[test]
    fn test_build_args_pipe_channel() {
        let cfg = ClipConfig::default();
        let args = build_args(&cfg, &request(15, 60.0));
        let joined = args.join(" ");
        assert!(joined.starts_with("-hide_banner -nostdin -y -i /work/uploads/in.upload -t 15.000 -vf"));
        assert!(args.contains(&"scale=720:1280:force_original_aspect_ratio=decrease,pad=720:1280:(ow-iw)/2:(oh-ih)/2,setsar=1".to_string()));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.contains("-progress pipe:1 -nostats"));
        assert_eq!(args.last().unwrap(), "/work/converted/out.mp4");
    }

    #[test]
    fn test_build_args_stderr_channel() {
        let cfg = ClipConfig { progress_channel: ProgressChannel::Stderr, ..Default::default() };
        let mut req = request(15, 60.0);
        req.resolution = Resolution::P1080;
        let args = build_args(&cfg, &req);
        assert!(!args.contains(&"-progress".to_string()));
        assert!(args.contains(&"-stats".to_string()));
        assert!(args.iter().any(|a| a.starts_with("scale=1080:1920")));
    }

    #[test]
    fn test_build_args_keeps_awkward_paths_intact() {
        let cfg = ClipConfig::default();
        let mut req = request(15, 60.0);
        req.input = PathBuf::from("/tmp/a \"quoted\" $(name).mp4");
        let args = build_args(&cfg, &req);
        assert_eq!(args[4], "/tmp/a \"quoted\" $(name).mp4");
    }

    #[test]
    fn test_last_diagnostic_skips_stats_and_blank_lines() {
        let tail: Vec<String> = [
            "Error while encoding stream #0:0",
            "frame=  150 fps=30 q=28.0 size=  512kB time=00:00:05.00 bitrate= 800.0kbits/s",
            "   ",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(last_diagnostic(&tail), Some("Error while encoding stream #0:0"));
        assert_eq!(last_diagnostic(&[]), None);
    }

    #[tokio::test]
    async fn test_drain_stream_reports_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: ProgressSink = Arc::new(move |p| seen_clone.lock().unwrap().push(p));

        let data: &[u8] = b"out_time_ms=1000000\nprogress=continue\nout_time_ms=N/A\nout_time_ms=5000000\nout_time_ms=10000000";
        let report = drain_stream(data, 10.0, Some(sink), 2).await;

        assert_eq!(*seen.lock().unwrap(), vec![10, 50, 100]);
        assert_eq!(report.last_percent, 100);
        assert_eq!(report.tail, VecDeque::from(vec!["out_time_ms=5000000".to_string(), "out_time_ms=10000000".to_string()]));
    }

    proptest! {
        /// The clip is never longer than the source or the requested trim
        #[test]
        fn test_effective_duration_is_min(trim in 1u32..600, probed in 0.1f64..7200.0) {
            let eff = request(trim, probed).effective_duration();
            prop_assert!(eff <= trim as f64);
            prop_assert!(eff <= probed);
            prop_assert!(eff == trim as f64 || eff == probed);
        }
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::testutil::{fake_ffmpeg, test_config};

        fn collecting_sink() -> (ProgressSink, Arc<Mutex<Vec<u8>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let seen_clone = seen.clone();
            (Arc::new(move |p| seen_clone.lock().unwrap().push(p)), seen)
        }

        fn setup(content: &str) -> (tempfile::TempDir, ClipConfig, TranscodeRequest) {
            let dir = tempfile::tempdir().unwrap();
            let cfg = test_config(dir.path(), fake_ffmpeg(dir.path()));
            let input = dir.path().join("in.upload");
            std::fs::write(&input, content).unwrap();
            let req = TranscodeRequest {
                input,
                output: dir.path().join("out.mp4"),
                trim_secs: 15,
                resolution: Resolution::P720,
                probed_secs: 5.0,
            };
            (dir, cfg, req)
        }

        #[tokio::test]
        async fn test_success_streams_progress_from_pipe() {
            let (_dir, cfg, req) = setup("duration=00:00:05.00");
            let (sink, seen) = collecting_sink();
            let outcome = run_transcode(&cfg, &req, sink, &CancellationToken::new()).await.unwrap();

            assert_eq!(outcome.effective_secs, 5.0);
            assert_eq!(outcome.last_progress, 100);
            assert_eq!(*seen.lock().unwrap(), vec![50, 100]);
            assert!(req.output.exists());
        }

        #[tokio::test]
        async fn test_success_streams_progress_from_stderr() {
            let (_dir, mut cfg, req) = setup("duration=00:00:05.00");
            cfg.progress_channel = ProgressChannel::Stderr;
            let (sink, seen) = collecting_sink();
            run_transcode(&cfg, &req, sink, &CancellationToken::new()).await.unwrap();
            assert_eq!(*seen.lock().unwrap(), vec![50, 100]);
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_failure_with_code() {
            let (_dir, cfg, req) = setup("duration=00:00:05.00 fail-encode");
            let (sink, _) = collecting_sink();
            let err = run_transcode(&cfg, &req, sink, &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, JobError::Transcode { exit_code: Some(3), .. }), "{:?}", err);
            assert_eq!(
                err.to_string(),
                "conversion failed: transcoder exit code 3: Error while encoding stream #0:0"
            );
        }

        #[tokio::test]
        async fn test_spawn_failure_is_failure() {
            let (dir, mut cfg, req) = setup("duration=00:00:05.00");
            cfg.ffmpeg_bin = dir.path().join("missing-binary");
            let (sink, _) = collecting_sink();
            let err = run_transcode(&cfg, &req, sink, &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, JobError::Transcode { exit_code: None, .. }));
        }

        #[tokio::test]
        async fn test_timeout_kills_hung_transcoder() {
            let (_dir, mut cfg, req) = setup("duration=00:00:05.00 hang-encode");
            cfg.transcode_timeout_secs = 1;
            let (sink, _) = collecting_sink();
            let started = std::time::Instant::now();
            let err = run_transcode(&cfg, &req, sink, &CancellationToken::new()).await.unwrap_err();
            assert!(matches!(err, JobError::Timeout { stage: "transcode", .. }), "{:?}", err);
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_cancellation_kills_transcoder() {
            let (_dir, cfg, req) = setup("duration=00:00:05.00 hang-encode");
            let (sink, _) = collecting_sink();
            let token = CancellationToken::new();
            let trigger = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                trigger.cancel();
            });
            let err = run_transcode(&cfg, &req, sink, &token).await.unwrap_err();
            assert!(matches!(err, JobError::Cancelled));
        }
    }
}
