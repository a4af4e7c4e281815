use std::path::PathBuf;
use std::time::Duration;

use super::fetch::LICHESS_DUMP_URL;
use super::prune::DEFAULT_KEEP_COUNT;
use super::record::RatingRange;
use crate::util::env::{env_opt, env_parse, env_parse_opt};

/// Process-level settings for the puzzle sync, read from the environment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub dataset_url: String,
    pub scratch_dir: PathBuf,
    pub rating: RatingRange,
    pub max_puzzles: Option<u64>,
    pub keep_count: u64,
    /// Stall limit for a single socket read; there is no whole-download deadline.
    pub http_read_timeout: Duration,
    pub db_max_conns: u32,
    pub zstd_bin: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dataset_url: LICHESS_DUMP_URL.to_string(),
            scratch_dir: std::env::temp_dir(),
            rating: RatingRange::default(),
            max_puzzles: None,
            keep_count: DEFAULT_KEEP_COUNT,
            http_read_timeout: Duration::from_secs(120),
            db_max_conns: 5,
            zstd_bin: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            dataset_url: env_opt("PUZZLE_DUMP_URL").unwrap_or(d.dataset_url),
            scratch_dir: env_opt("PUZZLE_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.scratch_dir),
            rating: RatingRange::new(
                env_parse("PUZZLE_RATING_MIN", d.rating.min),
                env_parse("PUZZLE_RATING_MAX", d.rating.max),
            ),
            // 0 means "no cap", same as unset.
            max_puzzles: env_parse_opt::<u64>("PUZZLE_MAX").filter(|&n| n > 0),
            keep_count: env_parse("PUZZLE_KEEP_COUNT", d.keep_count),
            http_read_timeout: Duration::from_secs(env_parse(
                "PUZZLE_HTTP_READ_TIMEOUT_SECS",
                d.http_read_timeout.as_secs(),
            )),
            db_max_conns: env_parse("DB_MAX_CONNS", d.db_max_conns),
            zstd_bin: env_opt("ZSTD_BIN").map(PathBuf::from),
        }
    }
}
