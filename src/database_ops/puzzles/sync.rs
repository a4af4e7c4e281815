//! One full dump sync: workspace -> fetch -> decompress -> ingest -> drain -> cleanup.

use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use super::config::SyncConfig;
use super::decompress::{Decompressor, FixtureDecompressor};
use super::error::{SyncError, SyncPhase};
use super::fetch::DatasetFetcher;
use super::ingest::{ingest_lines, IngestOptions, RunStats, StopReason};
use super::loader::BatchLoader;
use super::prune::{self, PruneOptions, PruneReport};
use super::record::RatingRange;
use super::store::PuzzleStore;
use super::workspace::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub max_puzzles: Option<u64>,
    pub rating_min: i32,
    pub rating_max: i32,
    /// Skip the download and ingest the built-in fixture.
    pub test_mode: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        let range = RatingRange::default();
        Self {
            max_puzzles: None,
            rating_min: range.min,
            rating_max: range.max,
            test_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Whole seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<&'static str>,
}

type PhaseResult<T> = Result<T, (SyncPhase, SyncError)>;

fn at<E: Into<SyncError>>(phase: SyncPhase) -> impl FnOnce(E) -> (SyncPhase, SyncError) {
    move |e| (phase, e.into())
}

/// Wires the pipeline stages together. Every collaborator is injected so each
/// run gets its own workspace and nothing is shared between runs but the store.
pub struct PuzzleSync {
    store: Arc<dyn PuzzleStore>,
    fetcher: Arc<dyn DatasetFetcher>,
    decompressor: Arc<dyn Decompressor>,
    dataset_url: String,
    scratch_root: PathBuf,
}

impl PuzzleSync {
    pub fn new(
        store: Arc<dyn PuzzleStore>,
        fetcher: Arc<dyn DatasetFetcher>,
        decompressor: Arc<dyn Decompressor>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            decompressor,
            dataset_url: config.dataset_url.clone(),
            scratch_root: config.scratch_dir.clone(),
        }
    }

    /// Run one sync. Never errors: fatal failures come back as `success: false`.
    pub async fn sync(&self, options: SyncOptions) -> SyncReport {
        info!(?options, decompressor = self.decompressor.name(), "starting chess puzzle sync");
        let started = Instant::now();

        let mut workspace = match Workspace::open(&self.scratch_root).await {
            Ok(ws) => ws,
            Err(e) => return failed(SyncPhase::Workspace, e.into()),
        };
        info!(phase = %SyncPhase::Workspace, dir = %workspace.dir().display(), "opened scratch workspace");

        let outcome = self.run(&workspace, &options).await;

        info!(phase = %SyncPhase::Cleanup, "cleaning up temporary files");
        workspace.close().await;

        let duration = started.elapsed().as_secs_f64().round() as u64;
        match outcome {
            Ok((stats, reason)) => {
                info!(
                    imported = stats.imported,
                    skipped = stats.skipped,
                    errors = stats.errors,
                    processed = stats.processed,
                    stop_reason = ?reason,
                    duration_secs = duration,
                    "chess puzzle sync completed"
                );
                SyncReport {
                    success: true,
                    stats: Some(stats),
                    stop_reason: Some(reason),
                    duration: Some(duration),
                    error: None,
                    failed_phase: None,
                }
            }
            Err((phase, e)) => failed(phase, e),
        }
    }

    async fn run(
        &self,
        workspace: &Workspace,
        options: &SyncOptions,
    ) -> PhaseResult<(RunStats, StopReason)> {
        let decompressor: &dyn Decompressor = if options.test_mode {
            warn!("test mode: skipping download");
            &FixtureDecompressor
        } else {
            info!(phase = %SyncPhase::Fetching, url = %self.dataset_url, "downloading puzzle dump");
            self.fetcher
                .download(&self.dataset_url, workspace.compressed_path())
                .await
                .map_err(at(SyncPhase::Fetching))?;
            self.decompressor.as_ref()
        };

        info!(phase = %SyncPhase::Decompressing, using = decompressor.name(), "decompressing puzzle data");
        decompressor
            .decompress(workspace.compressed_path(), workspace.decompressed_path())
            .await
            .map_err(at(SyncPhase::Decompressing))?;

        info!(phase = %SyncPhase::Ingesting, "importing puzzles to database");
        let file = tokio::fs::File::open(workspace.decompressed_path())
            .await
            .map_err(|e| (SyncPhase::Ingesting, SyncError::Read(e)))?;
        let reader = BufReader::with_capacity(1 << 20, file);

        let ingest_opts = IngestOptions {
            max_puzzles: options.max_puzzles.filter(|&n| n > 0),
            rating: RatingRange::new(options.rating_min, options.rating_max),
            created_at: Utc::now().timestamp(),
        };
        let mut loader = BatchLoader::new(self.store.as_ref());
        let mut stats = RunStats::default();
        let reason = ingest_lines(reader, &mut loader, &ingest_opts, &mut stats)
            .await
            .map_err(|e| (SyncPhase::Ingesting, SyncError::Read(e)))?;

        info!(phase = %SyncPhase::Draining, pending = loader.pending(), "flushing final batch");
        loader.flush().await;
        stats.imported = loader.imported();
        info!(flushes = loader.flushes(), imported = stats.imported, "batches written");
        if loader.failed_flushes() > 0 {
            warn!(failed = loader.failed_flushes(), "some batches failed to insert");
        }
        Ok((stats, reason))
    }

    pub async fn prune(&self, options: PruneOptions) -> PruneReport {
        prune::prune(self.store.as_ref(), options).await
    }
}

fn failed(phase: SyncPhase, e: SyncError) -> SyncReport {
    error!(%phase, error = %e, "chess puzzle sync failed");
    SyncReport {
        success: false,
        stats: None,
        stop_reason: None,
        duration: None,
        error: Some(e.to_string()),
        failed_phase: Some(phase.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::puzzles::error::{DecompressionError, DownloadError};
    use crate::database_ops::puzzles::ingest::MAX_CONSECUTIVE_FAILURES;
    use crate::database_ops::puzzles::store::MemoryStore;
    use std::path::Path;

    /// Writes a canned body to the destination; or fails with a status.
    struct StaticFetcher {
        body: Result<String, u16>,
    }

    #[async_trait::async_trait]
    impl DatasetFetcher for StaticFetcher {
        async fn download(&self, _url: &str, dest: &Path) -> Result<u64, DownloadError> {
            match &self.body {
                Ok(body) => {
                    tokio::fs::write(dest, body).await.unwrap();
                    Ok(body.len() as u64)
                }
                Err(code) => Err(DownloadError::Status(
                    reqwest::StatusCode::from_u16(*code).unwrap(),
                )),
            }
        }
    }

    /// "Decompresses" by copying, so tests can feed plain CSV through the fetcher.
    struct CopyDecompressor;

    #[async_trait::async_trait]
    impl Decompressor for CopyDecompressor {
        fn name(&self) -> &'static str {
            "copy"
        }
        async fn decompress(&self, src: &Path, dst: &Path) -> Result<(), DecompressionError> {
            tokio::fs::copy(src, dst).await.unwrap();
            Ok(())
        }
    }

    struct FailingDecompressor;

    #[async_trait::async_trait]
    impl Decompressor for FailingDecompressor {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn decompress(&self, _: &Path, _: &Path) -> Result<(), DecompressionError> {
            Err(DecompressionError::ExitStatus {
                program: "zstd".into(),
                status: "exit status: 1".into(),
            })
        }
    }

    fn line(id: u64, rating: i32) -> String {
        format!("g{id},\"8/8/8/8/8/8/8/K6k w - - 0 1\",\"a1a2\",{rating},50,10,\"mateIn1\",https://lichess.org/x\n")
    }

    struct Harness {
        _root: tempfile::TempDir,
        store: Arc<MemoryStore>,
        sync: PuzzleSync,
    }

    impl Harness {
        fn scratch(&self) -> &Path {
            self._root.path()
        }

        fn leftover_entries(&self) -> usize {
            std::fs::read_dir(self.scratch()).unwrap().count()
        }
    }

    fn harness(body: Result<String, u16>, decompressor: Arc<dyn Decompressor>) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            scratch_dir: root.path().to_path_buf(),
            ..SyncConfig::default()
        };
        let sync = PuzzleSync::new(
            store.clone(),
            Arc::new(StaticFetcher { body }),
            decompressor,
            &config,
        );
        Harness {
            _root: root,
            store,
            sync,
        }
    }

    #[tokio::test]
    async fn successful_run_imports_and_cleans_up() {
        let body: String = (1..=1500).map(|i| line(i, 1500)).collect();
        let h = harness(Ok(body), Arc::new(CopyDecompressor));

        let report = h.sync.sync(SyncOptions::default()).await;
        assert!(report.success);
        let stats = report.stats.unwrap();
        assert_eq!(stats.imported, 1500);
        assert_eq!(stats.processed, 1500);
        assert_eq!(report.stop_reason, Some(StopReason::EndOfInput));
        assert!(report.duration.is_some());
        assert_eq!(h.store.flush_sizes(), vec![1000, 500]);
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let body: String = (1..=20).map(|i| line(i, 1500)).collect();
        let h = harness(Ok(body), Arc::new(CopyDecompressor));

        let first = h.sync.sync(SyncOptions::default()).await;
        let before = h.store.get(7).unwrap();
        let second = h.sync.sync(SyncOptions::default()).await;

        assert_eq!(first.stats.unwrap().imported, 20);
        assert_eq!(second.stats.unwrap().imported, 0);
        assert_eq!(h.store.len(), 20);
        assert_eq!(h.store.get(7).unwrap(), before);
    }

    #[tokio::test]
    async fn download_failure_reports_and_cleans_up() {
        let h = harness(Err(503), Arc::new(CopyDecompressor));
        let report = h.sync.sync(SyncOptions::default()).await;

        assert!(!report.success);
        assert_eq!(report.failed_phase, Some("fetching"));
        assert!(report.error.unwrap().contains("503"));
        assert!(report.stats.is_none());
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn decompression_failure_never_falls_back_to_fixture() {
        let h = harness(Ok(line(1, 1500)), Arc::new(FailingDecompressor));
        let report = h.sync.sync(SyncOptions::default()).await;

        assert!(!report.success);
        assert_eq!(report.failed_phase, Some("decompressing"));
        assert!(h.store.is_empty());
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn circuit_breaker_is_still_success() {
        let mut body = "broken\n".repeat(MAX_CONSECUTIVE_FAILURES as usize);
        body.extend((1..=5).map(|i| line(i, 1500)));
        let h = harness(Ok(body), Arc::new(CopyDecompressor));

        let report = h.sync.sync(SyncOptions::default()).await;
        assert!(report.success);
        assert_eq!(report.stop_reason, Some(StopReason::CircuitBreaker));
        let stats = report.stats.unwrap();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.errors, 10);
        assert!(h.store.is_empty());
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn max_puzzles_caps_the_run() {
        let body: String = (1..=1000).map(|i| line(i, 1500)).collect();
        let h = harness(Ok(body), Arc::new(CopyDecompressor));

        let report = h
            .sync
            .sync(SyncOptions {
                max_puzzles: Some(100),
                ..SyncOptions::default()
            })
            .await;
        assert_eq!(report.stats.unwrap().processed, 100);
        assert_eq!(h.store.len(), 100);
    }

    #[tokio::test]
    async fn test_mode_ingests_fixture_without_download() {
        let h = harness(Err(500), Arc::new(FailingDecompressor));
        let report = h
            .sync
            .sync(SyncOptions {
                test_mode: true,
                ..SyncOptions::default()
            })
            .await;

        assert!(report.success);
        assert_eq!(report.stats.unwrap().imported, 3);
        assert_eq!(h.store.ids(), vec![1, 2, 3]);
        assert_eq!(h.leftover_entries(), 0);
    }

    #[tokio::test]
    async fn prune_goes_through_the_store() {
        let body: String = (1..=50).map(|i| line(i, 1500)).collect();
        let h = harness(Ok(body), Arc::new(CopyDecompressor));
        h.sync.sync(SyncOptions::default()).await;

        let report = h.sync.prune(PruneOptions { keep_count: 10 }).await;
        assert_eq!(report.deleted_count, 40);
        assert_eq!(h.store.count().await.unwrap(), 10);
    }

    #[test]
    fn report_serializes_camel_case_without_empty_fields() {
        let report = failed(
            SyncPhase::Fetching,
            SyncError::Download(DownloadError::Status(reqwest::StatusCode::NOT_FOUND)),
        );
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["failedPhase"], "fetching");
        assert!(v.get("stats").is_none());
    }
}
