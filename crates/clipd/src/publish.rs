use std::path::Path;
use chrono::{DateTime, Utc};
use humansize::{format_size, DECIMAL};
use log::info;
use crate::error::JobError;
use crate::storage::ArtifactStore;

pub const CONTENT_TYPE: &str = "video/mp4";
pub const DOWNLOAD_FILENAME: &str = "converted-video.mp4";

/// File name shared by the local output and the object key
pub fn artifact_name(submitted_at: DateTime<Utc>, disambiguator: &str) -> String {
    let short: String = disambiguator
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect();
    format!("converted_{}_{}.mp4", submitted_at.timestamp_millis(), short)
}

/// Object key for a job's artifact. The disambiguator is the job id, so two
/// submissions in the same millisecond still get distinct keys.
pub fn object_key(prefix: &str, submitted_at: DateTime<Utc>, disambiguator: &str) -> String {
    let name = artifact_name(submitted_at, disambiguator);
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Upload the transcoded output and return its public address. No retries.
pub async fn publish(store: &dyn ArtifactStore, output: &Path, key: &str) -> Result<String, JobError> {
    let bytes = match tokio::fs::read(output).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(JobError::transcode("transcoded output file does not exist", None));
        }
        Err(e) => return Err(JobError::Io(e)),
    };
    if bytes.is_empty() {
        return Err(JobError::transcode("transcoded output file is empty", None));
    }

    let size = bytes.len();
    let url = store.put(key, bytes, CONTENT_TYPE, DOWNLOAD_FILENAME).await?;
    info!("Published {} via {} store: {}", format_size(size, DECIMAL), store.name(), url);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStore, StorageError, StorageResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<(String, usize, String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactStore for RecordingStore {
        async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str, disposition_filename: &str) -> StorageResult<String> {
            if self.fail {
                return Err(StorageError::upload_failed("bucket unreachable"));
            }
            self.calls.lock().unwrap().push((
                key.to_string(),
                bytes.len(),
                content_type.to_string(),
                disposition_filename.to_string(),
            ));
            Ok(format!("mem://{}", key))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    #[test]
    fn test_object_key_format() {
        let t = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            object_key("converted", t, "0f3c9a1e-77aa-4b1e-9a5e-1234567890ab"),
            "converted/converted_1700000000123_0f3c9a1e.mp4"
        );
        assert_eq!(object_key("/", t, "abc"), "converted_1700000000123_abc.mp4");
    }

    #[test]
    fn test_object_keys_differ_within_same_millisecond() {
        let t = Utc::now();
        let a = object_key("converted", t, &crate::job::new_job_id());
        let b = object_key("converted", t, &crate::job::new_job_id());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_publish_uploads_with_mp4_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        std::fs::write(&out, b"0123456789").unwrap();
        let store = RecordingStore::default();

        let url = publish(&store, &out, "converted/k.mp4").await.unwrap();
        assert_eq!(url, "mem://converted/k.mp4");
        let calls = store.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            ("converted/k.mp4".to_string(), 10, "video/mp4".to_string(), "converted-video.mp4".to_string())
        );
    }

    #[tokio::test]
    async fn test_publish_failure_surfaces_cause() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mp4");
        std::fs::write(&out, b"x").unwrap();
        let store = RecordingStore { fail: true, ..Default::default() };

        let err = publish(&store, &out, "k.mp4").await.unwrap_err();
        assert!(matches!(err, JobError::Publish(_)));
        assert!(err.to_string().contains("bucket unreachable"));
    }

    #[tokio::test]
    async fn test_publish_rejects_missing_or_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("store"), None);

        let err = publish(&store, &dir.path().join("absent.mp4"), "k.mp4").await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));

        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        let err = publish(&store, &empty, "k.mp4").await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
