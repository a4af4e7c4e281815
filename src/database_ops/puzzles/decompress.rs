//! `.zst` -> `.csv` expansion.
//!
//! Two real strategies: the `zstd` binary as a subprocess, or the in-process
//! streaming decoder. [`probe_decompressor`] picks one once at startup.
//! [`FixtureDecompressor`] is the explicit test-mode stand-in.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use super::error::DecompressionError;

#[async_trait::async_trait]
pub trait Decompressor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn decompress(&self, src: &Path, dst: &Path) -> Result<(), DecompressionError>;
}

/// Runs `zstd -d -q -f <src> -o <dst>`. Output is never buffered in memory:
/// stdout is discarded and stderr goes to the parent's stderr.
#[derive(Debug, Clone)]
pub struct ZstdCommand {
    program: PathBuf,
}

impl ZstdCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait::async_trait]
impl Decompressor for ZstdCommand {
    fn name(&self) -> &'static str {
        "zstd-cli"
    }

    #[instrument(skip(self, src, dst), fields(program = %self.program.display()))]
    async fn decompress(&self, src: &Path, dst: &Path) -> Result<(), DecompressionError> {
        let program = self.program.display().to_string();
        let status = Command::new(&self.program)
            .arg("-d")
            .arg("-q")
            .arg("-f")
            .arg(src)
            .arg("-o")
            .arg(dst)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| DecompressionError::Unavailable {
                program: program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(DecompressionError::ExitStatus {
                program,
                status: status.to_string(),
            });
        }
        info!("decompressed using system zstd");
        Ok(())
    }
}

/// In-process streaming decoder; constant memory, runs on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct ZstdStream;

/// Lichess dumps may use long-distance windows beyond the decoder default.
const WINDOW_LOG_MAX: u32 = 31;

fn decode_file(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let input = BufReader::with_capacity(1 << 20, File::open(src)?);
    let mut decoder = zstd::stream::read::Decoder::with_buffer(input)?;
    decoder.window_log_max(WINDOW_LOG_MAX)?;
    let mut out = BufWriter::with_capacity(1 << 20, File::create(dst)?);
    let n = std::io::copy(&mut decoder, &mut out)?;
    out.flush()?;
    Ok(n)
}

#[async_trait::async_trait]
impl Decompressor for ZstdStream {
    fn name(&self) -> &'static str {
        "zstd-stream"
    }

    #[instrument(skip(self, src, dst))]
    async fn decompress(&self, src: &Path, dst: &Path) -> Result<(), DecompressionError> {
        let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
        let path = src.clone();
        let bytes = tokio::task::spawn_blocking(move || decode_file(&src, &dst))
            .await
            .map_err(|e| DecompressionError::Join(e.to_string()))?
            .map_err(|source| DecompressionError::Codec { path, source })?;
        info!(bytes, "decompressed using in-process zstd decoder");
        Ok(())
    }
}

/// Small, well-formed dump used by `--test-mode`.
pub const FIXTURE_CSV: &str = "\
PuzzleId,FEN,Moves,Rating,Popularity,NbPlays,Themes,GameUrl
g00001,\"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1\",\"e2e4 e7e5\",1422,54,999,\"endgame fork\",https://lichess.org/XXXXX#0
g00002,\"rnbqkb1r/pppp1ppp/5n2/4p3/2B1P3/8/PPPP1PPP/RNBQK1NR w KQkq - 2 3\",\"d1h5 g6 h5c5\",1654,72,1205,\"mateIn2 sacrifice\",https://lichess.org/YYYYY#0
g00003,\"6k1/5ppp/8/8/8/8/5PPP/3R2K1 w - - 0 1\",\"d1d8\",812,88,40211,\"backRankMate mateIn1 oneMove\",https://lichess.org/ZZZZZ#0
";

/// Ignores the compressed input and writes [`FIXTURE_CSV`].
///
/// Only selected when a caller asks for test mode; never used to paper over
/// a failed real decompression.
#[derive(Debug, Clone, Default)]
pub struct FixtureDecompressor;

#[async_trait::async_trait]
impl Decompressor for FixtureDecompressor {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn decompress(&self, _src: &Path, dst: &Path) -> Result<(), DecompressionError> {
        tokio::fs::write(dst, FIXTURE_CSV)
            .await
            .map_err(|source| DecompressionError::Codec {
                path: dst.to_path_buf(),
                source,
            })?;
        warn!("test mode: wrote built-in fixture instead of decompressing");
        Ok(())
    }
}

/// Pick a decompressor once: an explicit binary, then `zstd` on `PATH`,
/// then the in-process decoder.
pub fn probe_decompressor(explicit_bin: Option<&Path>) -> Arc<dyn Decompressor> {
    let found = match explicit_bin {
        Some(p) => which::which(p).ok(),
        None => which::which("zstd").ok(),
    };
    match found {
        Some(program) => {
            info!(program = %program.display(), "zstd binary found; using subprocess");
            Arc::new(ZstdCommand::new(program))
        }
        None => {
            warn!("zstd binary not found; using in-process decoder");
            Arc::new(ZstdStream)
        }
    }
}
