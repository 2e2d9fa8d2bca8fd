use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use walkdir::WalkDir;

/// Raw submitted media, before it is staged into the work dir
#[derive(Debug, Clone)]
pub enum Upload {
    /// Bytes already in memory (e.g. a decoded multipart body)
    Bytes(Vec<u8>),
    /// A file to copy; the original is left untouched
    File(PathBuf),
}

impl Upload {
    /// Size in bytes, without reading file contents
    pub async fn len(&self) -> std::io::Result<u64> {
        match self {
            Upload::Bytes(bytes) => Ok(bytes.len() as u64),
            Upload::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }
}

/// A temporary file owned by exactly one job.
///
/// `release` deletes it. Anything not released by the time the handle is
/// dropped (a panicking or aborted pipeline) is removed synchronously.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    released: bool,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        ScratchFile { path, released: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. Failures are logged, never returned.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("🗑️  Deleted scratch file: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete scratch file {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("🗑️  Deleted unreleased scratch file: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete scratch file {}: {}", self.path.display(), e),
        }
    }
}

/// Path of the staged upload for a job
pub fn upload_path(uploads_dir: &Path, job_id: &str) -> PathBuf {
    uploads_dir.join(format!("{}.upload", job_id))
}

/// Write the submitted media into the uploads dir and take ownership of it
pub async fn stage_upload(uploads_dir: &Path, job_id: &str, upload: Upload) -> std::io::Result<ScratchFile> {
    tokio::fs::create_dir_all(uploads_dir).await?;
    let path = upload_path(uploads_dir, job_id);
    // Own the path before writing so a failed write is still cleaned up
    let handle = ScratchFile::new(path.clone());
    match upload {
        Upload::Bytes(bytes) => tokio::fs::write(&path, bytes).await?,
        Upload::File(src) => {
            tokio::fs::copy(&src, &path).await?;
        }
    }
    Ok(handle)
}

/// Delete files left in the scratch dirs by a previous process.
///
/// Job state does not survive a restart, so nothing in these directories can
/// belong to a live job at startup. Returns the number of files removed.
pub fn sweep_orphans(dirs: &[PathBuf]) -> Result<usize> {
    let mut cleaned = 0;
    for dir in dirs {
        if !dir.exists() {
            continue;
        }
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            std::fs::remove_file(entry.path())
                .with_context(|| format!("Failed to delete orphaned scratch file: {}", entry.path().display()))?;
            cleaned += 1;
            info!("🗑️  Deleted orphaned scratch file: {}", entry.path().display());
        }
    }
    Ok(cleaned)
}
