// livegate/src/pipeline/staging.rs
//
// Per-request temp files.
//
// The engine takes a file path, so every request stages its decoded bytes on
// disk. Names combine a monotonic millisecond clock, the process id and an
// atomic sequence number, so two requests landing in the same millisecond
// never collide. The returned guard deletes the file when dropped; every exit
// path of a request therefore cleans up, including panics and early returns.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, warn};

pub const ARTIFACT_SUFFIX: &str = "output_file.dat";

pub struct StagingArea {
    dir:   PathBuf,
    epoch: Instant,
    seq:   AtomicU64,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), epoch: Instant::now(), seq: AtomicU64::new(0) }
    }

    pub fn dir(&self) -> &Path { &self.dir }

    /// Create the staging directory if needed.
    pub async fn prepare(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    fn next_path(&self) -> PathBuf {
        let millis = self.epoch.elapsed().as_millis();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{}-{}-{}{}", millis, std::process::id(), seq, ARTIFACT_SUFFIX))
    }

    /// Write `bytes` to a fresh artifact. A failed write removes whatever was
    /// partially written.
    pub async fn stage(&self, bytes: &[u8]) -> io::Result<RequestArtifact> {
        let artifact = RequestArtifact { path: self.next_path(), removed: false };
        tokio::fs::write(&artifact.path, bytes).await?;
        debug!(path = %artifact.path.display(), bytes = bytes.len(), "image staged");
        Ok(artifact)
    }
}

/// A staged image file, deleted on drop.
#[derive(Debug)]
pub struct RequestArtifact {
    path:    PathBuf,
    removed: bool,
}

impl RequestArtifact {
    pub fn path(&self) -> &Path { &self.path }

    /// Delete now and report the outcome. A file that is already gone counts
    /// as removed.
    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl Drop for RequestArtifact {
    fn drop(&mut self) {
        if self.removed { return; }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to remove staged image");
            }
        }
    }
}
