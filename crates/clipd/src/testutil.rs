use std::path::{Path, PathBuf};
use crate::config::{ClipConfig, StorageConfig};

const FAKE_FFMPEG: &str = r##"#!/bin/sh
input=""; progress=""; out=""; mode="probe"
while [ $# -gt 0 ]; do
  case "$1" in
    -i) input="$2"; shift 2 ;;
    -progress) progress="$2"; shift 2 ;;
    -y) mode="transcode"; shift ;;
    *) out="$1"; shift ;;
  esac
done
content=$(cat "$input" 2>/dev/null)
if [ "$mode" = "probe" ]; then
  case "$content" in
    *hang-probe*) exec sleep 30 ;;
  esac
  case "$content" in
    *duration=*)
      d=${content#*duration=}; d=${d%% *}
      echo "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from '$input':" >&2
      echo "  Duration: $d, start: 0.000000, bitrate: 1205 kb/s" >&2 ;;
    *) echo "$input: Invalid data found when processing input" >&2 ;;
  esac
  echo "At least one output file must be specified" >&2
  exit 1
fi
case "$content" in
  *fail-encode*) echo "Error while encoding stream #0:0" >&2; exit 3 ;;
  *hang-encode*) exec sleep 30 ;;
esac
if [ "$progress" = "pipe:1" ]; then
  printf 'frame=75\nout_time_ms=2500000\nprogress=continue\n'
  printf 'frame=150\nout_time_ms=5000000\nprogress=end\n'
else
  printf 'frame=   75 fps=30 q=28.0 size=  256kB time=00:00:02.50 bitrate= 800.0kbits/s speed=1.0x\r' >&2
  printf 'frame=  150 fps=30 q=28.0 size=  512kB time=00:00:05.00 bitrate= 800.0kbits/s speed=1.0x\r' >&2
fi
case "$content" in
  *empty-output*) : > "$out" ;;
  *) printf 'fake-mp4-bytes' > "$out" ;;
esac
exit 0
"##;

/// Write the fake ffmpeg into `dir` and return its path.
///
/// The fake reads the input file and reacts to markers in it:
/// `duration=HH:MM:SS.ff` (probe reports it), `corrupt` (no duration),
/// `hang-probe`, `hang-encode`, `fail-encode`, `empty-output`.
pub fn fake_ffmpeg(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ffmpeg");
    std::fs::write(&path, FAKE_FFMPEG).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Config rooted in `dir` with short timeouts and a local store
pub fn test_config(dir: &Path, ffmpeg_bin: PathBuf) -> ClipConfig {
    ClipConfig {
        work_dir: dir.join("work"),
        ffmpeg_bin,
        probe_timeout_secs: 10,
        transcode_timeout_secs: 10,
        publish_timeout_secs: 10,
        storage: StorageConfig::Local {
            root: dir.join("artifacts"),
            public_base_url: Some("https://cdn.example.com".to_string()),
        },
        ..ClipConfig::default()
    }
}
