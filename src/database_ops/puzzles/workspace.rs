//! Per-run scratch directory holding the compressed and decompressed dump.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::WorkspaceError;

const COMPRESSED_NAME: &str = "lichess_puzzles.csv.zst";
const DECOMPRESSED_NAME: &str = "lichess_puzzles.csv";

/// Paths for one run. The directory name carries a random suffix so
/// overlapping runs never share (or clean up) each other's files.
#[derive(Debug)]
pub struct Workspace {
    dir: PathBuf,
    compressed: PathBuf,
    decompressed: PathBuf,
    closed: bool,
}

impl Workspace {
    /// Create `<root>/puzzle-sync-<uuid>/`.
    pub async fn open(root: &Path) -> Result<Self, WorkspaceError> {
        let dir = root.join(format!("puzzle-sync-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| WorkspaceError {
                path: dir.clone(),
                source,
            })?;
        debug!(dir = %dir.display(), "workspace opened");
        Ok(Self {
            compressed: dir.join(COMPRESSED_NAME),
            decompressed: dir.join(DECOMPRESSED_NAME),
            dir,
            closed: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn compressed_path(&self) -> &Path {
        &self.compressed
    }

    pub fn decompressed_path(&self) -> &Path {
        &self.decompressed
    }

    /// Remove the directory and everything in it. Missing paths are not an error
    /// and repeated calls are no-ops. Failures are logged, never returned.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => debug!(dir = %self.dir.display(), "workspace removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.dir.display(), error = %e, "workspace cleanup failed"),
        }
        self.closed = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.closed {
            // Panic or early drop: best-effort synchronous removal.
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(dir = %self.dir.display(), error = %e, "workspace cleanup on drop failed");
                }
            }
        }
    }
}
