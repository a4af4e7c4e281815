//! Bulk chess puzzle dump synchronisation.
//!
//! A run downloads the Lichess puzzle dump (`.csv.zst`), expands it into a
//! per-run scratch directory, streams the CSV line by line into idempotent
//! batch inserts and then removes the scratch directory. Pruning to a row cap
//! is a separate operation on the same store.

pub mod config;
pub mod decompress;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod loader;
pub mod prune;
pub mod record;
pub mod store;
pub mod sync;
pub mod workspace;

pub use config::SyncConfig;
pub use error::{DecompressionError, DownloadError, RecordError, SyncError, SyncPhase};
pub use ingest::{RunStats, StopReason, MAX_CONSECUTIVE_FAILURES};
pub use loader::BATCH_SIZE;
pub use prune::{PruneOptions, PruneReport};
pub use record::{PuzzleRecord, RatingRange};
pub use store::{MemoryStore, PgPuzzleStore, PuzzleStore};
pub use sync::{PuzzleSync, SyncOptions, SyncReport};
