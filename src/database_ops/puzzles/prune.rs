use serde::Serialize;
use tracing::{error, info};

use super::store::PuzzleStore;

pub const DEFAULT_KEEP_COUNT: u64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneOptions {
    pub keep_count: u64,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            keep_count: DEFAULT_KEEP_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub deleted_count: u64,
}

/// Trim the table to the `keep_count` newest rows. Store errors are logged and
/// reported as nothing deleted.
pub async fn prune(store: &dyn PuzzleStore, options: PruneOptions) -> PruneReport {
    let deleted_count = match store.prune_to(options.keep_count).await {
        Ok(n) => {
            info!(keep = options.keep_count, deleted = n, "pruned chess puzzles");
            n
        }
        Err(e) => {
            error!(keep = options.keep_count, error = %e, "chess puzzle prune failed");
            0
        }
    };
    PruneReport { deleted_count }
}
