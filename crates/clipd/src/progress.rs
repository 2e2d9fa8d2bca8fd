use std::sync::LazyLock;
use regex::Regex;

/// `Duration: 00:01:02.05,` as printed by `ffmpeg -i`
static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("Invalid DURATION_RE regex pattern")
});

/// `time=00:00:07.50` inside an ffmpeg stats line
static STATS_TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)time=\s*(-?\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("Invalid STATS_TIME_RE regex pattern")
});

/// Parse `HH:MM:SS(.ff)` into seconds
pub fn parse_clock(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let hours: f64 = parts[0].parse().ok()?;
    let mins: f64 = parts[1].parse().ok()?;
    let secs: f64 = parts[2].parse().ok()?;
    let total = hours * 3600.0 + mins * 60.0 + secs;
    (total.is_finite() && total >= 0.0).then_some(total)
}

/// Find the container duration in `ffmpeg -i` diagnostics
pub fn parse_duration_token(text: &str) -> Option<f64> {
    let caps = DURATION_RE.captures(text)?;
    let hours: f64 = caps[1].parse().ok()?;
    let mins: f64 = caps[2].parse().ok()?;
    let secs: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + mins * 60.0 + secs)
}

/// Extract elapsed output time, in seconds, from one line of progress output.
///
/// Understands the `-progress` key/value protocol (`out_time_ms`, `out_time_us`,
/// `out_time`) and the `time=` token of the human-readable stats line.
/// Anything else, including `N/A` and the negative sentinel ffmpeg prints
/// before the first frame, yields `None`.
pub fn parse_marker(line: &str) -> Option<f64> {
    let line = line.trim();

    if let Some((key, value)) = line.split_once('=') {
        let value = value.trim();
        match key.trim() {
            // Despite the name, out_time_ms carries microseconds
            "out_time_ms" | "out_time_us" => {
                let micros: i64 = value.parse().ok()?;
                return (micros >= 0).then(|| micros as f64 / 1_000_000.0);
            }
            "out_time" => return parse_clock(value),
            _ => {}
        }
    }

    let caps = STATS_TIME_RE.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    if hours < 0.0 {
        return None;
    }
    let mins: f64 = caps[2].parse().ok()?;
    let secs: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + mins * 60.0 + secs)
}

/// `min(100, round(elapsed / effective * 100))`; 0 when the denominator is unusable
pub fn percent(elapsed_secs: f64, effective_secs: f64) -> u8 {
    if !(effective_secs > 0.0) || !elapsed_secs.is_finite() || elapsed_secs <= 0.0 {
        return 0;
    }
    let pct = (elapsed_secs / effective_secs * 100.0).round();
    pct.min(100.0) as u8
}

/// Reassembles lines from arbitrarily split chunks.
///
/// Lines end at `\n` or `\r` (ffmpeg rewrites its stats line with carriage
/// returns). An unterminated tail is kept until the next chunk or `finish`.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Upper bound on a buffered partial line; longer garbage is discarded
    const MAX_PENDING: usize = 64 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every line completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
                if self.pending.len() > Self::MAX_PENDING {
                    self.pending.clear();
                }
            }
        }
        lines
    }

    /// Emit whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let bytes = std::mem::take(&mut self.pending);
        // Malformed bytes are dropped, the rest of the stream still parses
        if let Ok(line) = String::from_utf8(bytes) {
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
    }
}
