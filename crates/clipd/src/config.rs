use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::job::Resolution;

/// Where the transcoder's elapsed-time markers are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressChannel {
    /// `-progress pipe:1`: `key=value` lines on stdout
    Pipe,
    /// `time=HH:MM:SS.ff` tokens in the diagnostic stream
    Stderr,
}

/// Durable artifact store backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Write artifacts into a local directory
    Local {
        root: PathBuf,
        #[serde(default)]
        public_base_url: Option<String>,
    },
    /// Upload artifacts to an S3-compatible bucket
    S3 {
        bucket: String,
        region: String,
        #[serde(default)]
        endpoint_url: Option<String>,
        #[serde(default)]
        public_base_url: Option<String>,
        #[serde(default)]
        access_key_id: Option<String>,
        #[serde(default)]
        secret_access_key: Option<String>,
    },
}

/// Configuration for the clip job engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipConfig {
    /// Root for per-job scratch files (uploads/ and converted/ live here)
    pub work_dir: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Trim length used when the request gives none (or a non-positive one)
    pub default_trim_secs: u32,
    /// Target used when the request names an unknown resolution
    pub default_resolution: Resolution,
    /// Largest accepted upload in bytes
    pub max_upload_bytes: u64,
    /// How long terminal jobs stay queryable
    pub retention_secs: u64,
    /// Number of pipelines allowed to run at once
    pub max_concurrent_jobs: usize,
    pub probe_timeout_secs: u64,
    pub transcode_timeout_secs: u64,
    pub publish_timeout_secs: u64,
    pub progress_channel: ProgressChannel,
    pub video_codec: String,
    pub video_preset: String,
    pub audio_codec: String,
    /// Key prefix for published objects
    pub key_prefix: String,
    pub storage: StorageConfig,
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ClipConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        let work_dir = PathBuf::from("/tmp/clipd");
        Self {
            storage: StorageConfig::Local {
                root: work_dir.join("artifacts"),
                public_base_url: None,
            },
            work_dir,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            default_trim_secs: 15,
            default_resolution: Resolution::P720,
            max_upload_bytes: 100 * 1024 * 1024, // 100MB
            retention_secs: 30,
            max_concurrent_jobs: 2,
            probe_timeout_secs: 30,
            transcode_timeout_secs: 600,
            publish_timeout_secs: 120,
            progress_channel: ProgressChannel::Pipe,
            video_codec: "libx264".to_string(),
            video_preset: "veryfast".to_string(),
            audio_codec: "aac".to_string(),
            key_prefix: "converted".to_string(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // .toml is TOML, anything else JSON
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment wins over the file. `S3_BUCKET_NAME` switches storage to S3.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("CLIPD_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Ok(bin) = std::env::var("CLIPD_FFMPEG") {
            self.ffmpeg_bin = PathBuf::from(bin);
        }

        let bucket_env = std::env::var("S3_BUCKET_NAME").ok();
        let region_env = std::env::var("AWS_REGION").ok();
        match &mut self.storage {
            StorageConfig::S3 { bucket, region, .. } => {
                if let Some(b) = bucket_env {
                    *bucket = b;
                }
                if let Some(r) = region_env {
                    *region = r;
                }
            }
            StorageConfig::Local { .. } => {
                if let Some(bucket) = bucket_env {
                    self.storage = StorageConfig::S3 {
                        bucket,
                        region: region_env.unwrap_or_else(|| "us-east-1".to_string()),
                        endpoint_url: None,
                        public_base_url: None,
                        access_key_id: None,
                        secret_access_key: None,
                    };
                }
            }
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.work_dir.join("uploads")
    }

    pub fn converted_dir(&self) -> PathBuf {
        self.work_dir.join("converted")
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}
