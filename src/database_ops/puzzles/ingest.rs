//! Line-by-line ingestion of the decompressed dump into a [`BatchLoader`].

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use super::error::RecordError;
use super::loader::BatchLoader;
use super::record::{is_header_line, parse_line, RatingRange};

/// Consecutive bad lines after which ingestion stops (without failing the run).
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

const PROGRESS_EVERY: u64 = 10_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub imported: u64,
    pub skipped: u64,
    pub errors: u64,
    pub processed: u64,
    #[serde(skip)]
    pub consecutive_failures: u32,
}

impl RunStats {
    fn record_failure(&mut self) {
        self.errors += 1;
        self.consecutive_failures += 1;
    }

    fn record_processed(&mut self, skipped: bool) {
        if skipped {
            self.skipped += 1;
        }
        self.processed += 1;
        self.consecutive_failures = 0;
    }

    pub fn breaker_tripped(&self) -> bool {
        self.consecutive_failures >= MAX_CONSECUTIVE_FAILURES
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// `None` = no cap.
    pub max_puzzles: Option<u64>,
    pub rating: RatingRange,
    /// Stamped on every record of the run.
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfInput,
    MaxPuzzles,
    CircuitBreaker,
}

/// Read `reader` to the end (or an early stop), handing in-range records to `loader`.
///
/// Only I/O errors on the reader are returned; malformed lines land in `stats`.
/// The loader's final partial batch is left for the caller to flush.
pub async fn ingest_lines<R>(
    mut reader: R,
    loader: &mut BatchLoader<'_>,
    opts: &IngestOptions,
    stats: &mut RunStats,
) -> std::io::Result<StopReason>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(512);
    let mut line_no = 0u64;

    loop {
        if let Some(max) = opts.max_puzzles {
            if stats.processed >= max {
                info!(max, "reached max puzzles limit");
                return Ok(StopReason::MaxPuzzles);
            }
        }

        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(StopReason::EndOfInput);
        }
        line_no += 1;

        let parsed = match std::str::from_utf8(trim_eol(&buf)) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) if line_no == 1 && is_header_line(line) => continue,
            Ok(line) => parse_line(line, opts.created_at),
            Err(_) => Err(RecordError::Encoding),
        };

        match parsed {
            Err(e) => {
                stats.record_failure();
                debug!(line_no, error = %e, "skipping malformed line");
                if stats.breaker_tripped() {
                    warn!(
                        line_no,
                        consecutive = stats.consecutive_failures,
                        processed = stats.processed,
                        "too many consecutive bad lines; stopping ingestion"
                    );
                    return Ok(StopReason::CircuitBreaker);
                }
                continue;
            }
            Ok(record) if !opts.rating.contains(record.rating) => {
                stats.record_processed(true);
            }
            Ok(record) => {
                loader.add(record).await;
                stats.record_processed(false);
            }
        }

        if stats.processed % PROGRESS_EVERY == 0 {
            info!(
                processed = stats.processed,
                imported = loader.imported(),
                "ingest progress"
            );
        }
    }
}

fn trim_eol(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
