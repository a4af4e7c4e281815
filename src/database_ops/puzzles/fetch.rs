//! Streams the compressed dump to disk chunk by chunk.

use futures::StreamExt;
use reqwest::{Client, ClientBuilder};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, instrument};

use super::error::DownloadError;

pub const LICHESS_DUMP_URL: &str = "https://database.lichess.org/lichess_db_puzzle.csv.zst";

#[async_trait::async_trait]
pub trait DatasetFetcher: Send + Sync {
    /// Write the body at `url` to `dest`. Returns bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: Client,
}

/// No whole-request deadline: the dump is hundreds of MB and a slow but
/// progressing transfer must finish. `read_timeout` only fires on a stalled socket.
fn client_builder(read_timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(concat!("puzzle-sync/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .read_timeout(read_timeout)
}

impl HttpFetcher {
    pub fn new(read_timeout: Duration) -> Result<Self, DownloadError> {
        let http = client_builder(read_timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl DatasetFetcher for HttpFetcher {
    #[instrument(skip(self, dest), fields(dest = %dest.display()))]
    async fn download(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }

        let io_err = |source| DownloadError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut out = BufWriter::with_capacity(1 << 20, file);
        let mut written = 0u64;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        out.flush().await.map_err(io_err)?;

        info!(
            mb = %format!("{:.1}", written as f64 / 1024.0 / 1024.0),
            "downloaded puzzle dump"
        );
        Ok(written)
    }
}
