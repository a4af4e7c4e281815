use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Stage of a sync run. Failures carry the phase they happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Workspace,
    Fetching,
    Decompressing,
    Ingesting,
    Draining,
    Cleanup,
}

impl SyncPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncPhase::Workspace => "workspace",
            SyncPhase::Fetching => "fetching",
            SyncPhase::Decompressing => "decompressing",
            SyncPhase::Ingesting => "ingesting",
            SyncPhase::Draining => "draining",
            SyncPhase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("failed to download puzzle dump: HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DecompressionError {
    #[error("could not decompress puzzle file: `{program}` is unavailable ({source}); install zstd (apt install zstd / brew install zstd)")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with {status}")]
    ExitStatus { program: String, status: String },

    #[error("decoding {path}: {source}")]
    Codec {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("decompression task aborted: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
#[error("workspace {path}: {source}")]
pub struct WorkspaceError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Per-line failure. Absorbed into the run counters, never fatal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("expected at least 7 columns, found {0}")]
    TooFewColumns(usize),

    #[error("invalid puzzle id {0:?}")]
    InvalidId(String),

    #[error("invalid rating {0:?}")]
    InvalidRating(String),

    #[error("line is not valid UTF-8")]
    Encoding,
}

/// Fatal run error.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Decompression(#[from] DecompressionError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("reading decompressed dump: {0}")]
    Read(#[source] io::Error),
}
