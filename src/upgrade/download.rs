//! Streaming package download.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::constants::DOWNLOAD_CONNECT_TIMEOUT;
use crate::core::UpdateError;
use crate::upgrade::config::UpgradeConfig;

/// Interval for indeterminate progress when the size is unknown.
const UNKNOWN_SIZE_REPORT_BYTES: u64 = 1024 * 1024;

/// Downloads a release package to a local file.
///
/// The whole transfer is bounded by the configured timeout. Non-success
/// statuses, connection failures and timeouts are reported as network errors;
/// a file below the minimum size is an integrity error. On any failure the
/// partial file is removed, so nothing downstream can pick it up.
pub struct PackageDownloader {
    client: reqwest::Client,
    timeout: Duration,
    min_bytes: u64,
}

impl PackageDownloader {
    pub fn new(config: &UpgradeConfig) -> Result<Self> {
        let client = config
            .http_client_builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            timeout: config.download_timeout(),
            min_bytes: config.min_download_bytes,
        })
    }

    /// Stream `url` into `dest`. Returns the number of bytes written.
    ///
    /// `on_progress(percent, bytes)` receives a percentage when the server sent
    /// a content length, `None` otherwise.
    pub async fn download<F>(&self, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(Option<u8>, u64),
    {
        info!("Downloading {} to {}", url, dest.display());
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let outcome =
            match tokio::time::timeout(self.timeout, self.transfer(url, dest, &mut on_progress))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(UpdateError::Timeout {
                    url: url.to_string(),
                    seconds: self.timeout.as_secs(),
                }
                .into()),
            };

        let size = match outcome {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(dest).await;
                return Err(e);
            }
        };

        if size < self.min_bytes {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(UpdateError::DownloadTooSmall {
                size,
                minimum: self.min_bytes,
            }
            .into());
        }

        info!("Downloaded {} bytes", size);
        Ok(size)
    }

    async fn transfer<F>(&self, url: &str, dest: &Path, on_progress: &mut F) -> Result<u64>
    where
        F: FnMut(Option<u8>, u64),
    {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let total = response.content_length().filter(|len| *len > 0);
        debug!("Content length: {:?}", total);

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut written: u64 = 0;
        let mut last_percent: Option<u8> = None;
        let mut next_report = UNKNOWN_SIZE_REPORT_BYTES;
        on_progress(total.map(|_| 0), 0);

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| request_error(url, e, self.timeout))?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;

            match total {
                Some(total) => {
                    let percent = (written.saturating_mul(100) / total).min(100) as u8;
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        on_progress(Some(percent), written);
                    }
                }
                None if written >= next_report => {
                    next_report = written + UNKNOWN_SIZE_REPORT_BYTES;
                    on_progress(None, written);
                }
                None => {}
            }
        }

        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", dest.display()))?;
        Ok(written)
    }
}

fn request_error(url: &str, error: reqwest::Error, timeout: Duration) -> anyhow::Error {
    if error.is_timeout() {
        UpdateError::Timeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        }
        .into()
    } else {
        UpdateError::Network {
            operation: "download".to_string(),
            reason: error.to_string(),
        }
        .into()
    }
}
