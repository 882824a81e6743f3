//! Artifact download with streaming checksum.
//!
//! Bytes are hashed as they are written, so the checksum is known the moment
//! the download completes. Supports `http(s)://` and `file://` URLs.

use agentenv_core::checksum::{Checksum, ChecksumAlgorithm, ChecksumHasher};
use agentenv_core::{Error, IoResultExt, Result};
use reqwest::Client;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Fetches artifacts to local files.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    /// Create a downloader.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("agentenv/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Download `url` to `dest` and return the checksum of the bytes written.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        algorithm: ChecksumAlgorithm,
    ) -> Result<Checksum> {
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_path(dest, "create download")?;
        let mut hasher = algorithm.hasher();

        let bytes = if let Some(path) = url.strip_prefix("file://") {
            copy_local(url, Path::new(path), &mut file, dest, &mut hasher).await?
        } else if url.starts_with("http://") || url.starts_with("https://") {
            self.copy_http(url, &mut file, dest, &mut hasher).await?
        } else {
            return Err(Error::network(url, "unsupported URL scheme"));
        };

        file.flush().await.with_path(dest, "flush download")?;
        debug!(%url, bytes, "Downloaded artifact");
        Ok(hasher.finalize())
    }

    async fn copy_http(
        &self,
        url: &str,
        file: &mut tokio::fs::File,
        dest: &Path,
        hasher: &mut ChecksumHasher,
    ) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::network(url, format!("HTTP {}", response.status())));
        }

        let mut total = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::network(url, e.to_string()))?
        {
            hasher.update(&chunk);
            file.write_all(&chunk).await.with_path(dest, "write download")?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }
}

async fn copy_local(
    url: &str,
    source: &Path,
    file: &mut tokio::fs::File,
    dest: &Path,
    hasher: &mut ChecksumHasher,
) -> Result<u64> {
    let mut input = tokio::fs::File::open(source)
        .await
        .map_err(|e| Error::network(url, e.to_string()))?;
    let mut buffer = vec![0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = input
            .read(&mut buffer)
            .await
            .map_err(|e| Error::network(url, e.to_string()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        file.write_all(&buffer[..n]).await.with_path(dest, "write download")?;
        total += n as u64;
    }
    Ok(total)
}

/// File name for a downloaded artifact, taken from the URL path.
#[must_use]
pub fn artifact_name(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or("artifact")
        .to_string()
}
