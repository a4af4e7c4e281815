use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use puzzle_sync::database_ops::db::Db;
use puzzle_sync::database_ops::puzzles::decompress::probe_decompressor;
use puzzle_sync::database_ops::puzzles::fetch::HttpFetcher;
use puzzle_sync::database_ops::puzzles::{
    MemoryStore, PgPuzzleStore, PruneOptions, PuzzleStore, PuzzleSync, SyncConfig, SyncOptions,
    SyncReport,
};
use puzzle_sync::logging::{init_tracing, DEFAULT_FILTER};
use puzzle_sync::util::env;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "puzzle_sync", version, about = "Chess puzzle dump sync and retention")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone)]
struct SyncArgs {
    /// Stop after this many processed puzzles (0 = no cap)
    #[arg(long)]
    max_puzzles: Option<u64>,
    /// Lowest rating to keep (inclusive)
    #[arg(long)]
    rating_min: Option<i32>,
    /// Highest rating to keep (inclusive)
    #[arg(long)]
    rating_max: Option<i32>,
    /// Skip the download and ingest the built-in fixture
    #[arg(long, default_value_t = false)]
    test_mode: bool,
    /// Use an in-memory store instead of the database
    #[arg(long, default_value_t = false)]
    dry_run: bool,
    /// Override the dump URL
    #[arg(long)]
    url: Option<String>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Download, decompress and import the puzzle dump
    Sync(SyncArgs),
    /// Delete the oldest puzzles beyond the retention cap
    Prune {
        /// Rows to keep (defaults to PUZZLE_KEEP_COUNT / 200000)
        #[arg(long)]
        keep_count: Option<u64>,
    },
    /// Sync, then prune (what the scheduler invokes)
    Run {
        #[command(flatten)]
        sync: SyncArgs,
        #[arg(long)]
        keep_count: Option<u64>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_store(config: &SyncConfig, dry_run: bool) -> Result<Arc<dyn PuzzleStore>> {
    if dry_run {
        info!("dry run: using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let url = env::db_url().context("set DATABASE_URL (or PUZZLE_DB_URL / DB_URL)")?;
    let db = Db::connect(&url, config.db_max_conns).await?;
    Ok(Arc::new(PgPuzzleStore::new(db)))
}

async fn build(config: &SyncConfig, dry_run: bool) -> Result<PuzzleSync> {
    let store = open_store(config, dry_run).await?;
    let fetcher = Arc::new(HttpFetcher::new(config.http_read_timeout)?);
    let decompressor = probe_decompressor(config.zstd_bin.as_deref());
    Ok(PuzzleSync::new(store, fetcher, decompressor, config))
}

fn sync_options(config: &SyncConfig, args: &SyncArgs) -> SyncOptions {
    SyncOptions {
        max_puzzles: args.max_puzzles.or(config.max_puzzles),
        rating_min: args.rating_min.unwrap_or(config.rating.min),
        rating_max: args.rating_max.unwrap_or(config.rating.max),
        test_mode: args.test_mode,
    }
}

fn apply_url(config: &mut SyncConfig, args: &SyncArgs) {
    if let Some(url) = &args.url {
        config.dataset_url = url.clone();
    }
}

fn exit_on_failure(report: &SyncReport) {
    if !report.success {
        std::process::exit(1);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing(DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let mut config = SyncConfig::from_env();

    match cli.command {
        Commands::Sync(args) => {
            apply_url(&mut config, &args);
            let pipeline = build(&config, args.dry_run).await?;
            let report = pipeline.sync(sync_options(&config, &args)).await;
            print_json(&report)?;
            exit_on_failure(&report);
        }
        Commands::Prune { keep_count } => {
            let pipeline = build(&config, false).await?;
            let keep_count = keep_count.unwrap_or(config.keep_count);
            print_json(&pipeline.prune(PruneOptions { keep_count }).await)?;
        }
        Commands::Run { sync, keep_count } => {
            apply_url(&mut config, &sync);
            let pipeline = build(&config, sync.dry_run).await?;
            let report = pipeline.sync(sync_options(&config, &sync)).await;
            print_json(&report)?;
            let keep_count = keep_count.unwrap_or(config.keep_count);
            print_json(&pipeline.prune(PruneOptions { keep_count }).await)?;
            exit_on_failure(&report);
        }
    }
    Ok(())
}
