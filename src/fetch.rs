//! Remote file download.

use async_trait::async_trait;
use futures::StreamExt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// How long a download may go without progress by default.
pub const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors during a download.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// The server stopped responding.
    #[error("{url} stalled: no data for {}s", .idle.as_secs())]
    Stalled { url: String, idle: Duration },

    /// The destination could not be written.
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Get an actionable suggestion for fixing this error.
    pub fn fix_suggestion(&self) -> &'static str {
        match self {
            Self::Request { .. } => "Check your internet connection and try again",
            Self::Status { .. } => "The download location may have moved; check the configured URL",
            Self::Stalled { .. } => "The server stopped responding; try again later",
            Self::Io { .. } => "Check free disk space and write permissions on the target directory",
        }
    }
}

/// Streams a remote file to a local path.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `url` to `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// [`Fetcher`] over HTTP(S).
///
/// Connecting, waiting for the response headers and every body chunk are
/// each bounded by the stall timeout, so a server that goes quiet fails
/// the download instead of hanging it.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    stall_timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::with_stall_timeout(DEFAULT_STALL_TIMEOUT)
    }
}

impl HttpFetcher {
    /// Create a fetcher with the default stall timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fetcher that gives up after `stall_timeout` without progress.
    pub fn with_stall_timeout(stall_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            stall_timeout,
        }
    }

    async fn bounded<T>(&self, url: &str, step: impl Future<Output = T>) -> Result<T, FetchError> {
        tokio::time::timeout(self.stall_timeout, step)
            .await
            .map_err(|_| FetchError::Stalled {
                url: url.to_string(),
                idle: self.stall_timeout,
            })
    }

    async fn write_body(
        &self,
        url: &str,
        response: reqwest::Response,
        partial: &Path,
    ) -> Result<u64, FetchError> {
        let io_error = |source| FetchError::Io {
            path: partial.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(partial).await.map_err(io_error)?;
        let mut written = 0u64;
        let mut stream = std::pin::pin!(response.bytes_stream());
        while let Some(chunk) = self.bounded(url, stream.next()).await? {
            let chunk = chunk.map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;
            file.write_all(&chunk).await.map_err(io_error)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;
        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let response = self
            .bounded(url, self.client.get(url).send())
            .await?
            .map_err(|e| FetchError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        // Written beside the target and renamed on completion, so an
        // interrupted download never passes an existence check.
        let partial = partial_path(dest);
        let written = match self.write_body(url, response, &partial).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    tracing::debug!(path = %partial.display(), error = %cleanup, "partial download not removed");
                }
                return Err(e);
            }
        };

        tokio::fs::rename(&partial, dest)
            .await
            .map_err(|source| FetchError::Io {
                path: dest.to_path_buf(),
                source,
            })?;

        tracing::info!(url, dest = %dest.display(), bytes = written, "download complete");
        Ok(written)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}
