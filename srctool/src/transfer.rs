//! Catalog and archive downloads from the plugin server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, Response, Url};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::catalog::{CATALOG_FILE_NAME, Catalog};
use crate::error::{Result, SrctoolError};
use crate::integrity;
use crate::platform::{ARCHIVE_EXT, Platform, PluginName};

/// HTTP client for one download server and one target platform.
#[derive(Debug, Clone)]
pub struct TransferClient {
    client: Client,
    server_url: String,
    platform: Platform,
}

/// An archive whose bytes matched the catalog checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedArchive {
    pub path: PathBuf,
    pub digest: String,
    pub size: u64,
}

/// State of one archive transfer. Never reused across plugins.
#[derive(Debug)]
struct DownloadSession {
    url: String,
    expected_size: u64,
    path: PathBuf,
}

impl TransferClient {
    /// Create a client for `server_url`, bounding every request by
    /// `timeout`.
    pub fn new(server_url: &Url, platform: Platform, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SrctoolError::network(server_url.as_str(), e))?;

        Ok(Self {
            client,
            server_url: server_url.as_str().trim_end_matches('/').to_string(),
            platform,
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// URL of the `MD5SUMS` catalog.
    pub fn catalog_url(&self) -> String {
        format!("{}/{CATALOG_FILE_NAME}", self.server_url)
    }

    /// URL of a plugin archive for this client's platform.
    pub fn archive_url(&self, name: &PluginName) -> String {
        format!("{}/{}", self.server_url, self.platform.remote_path(name))
    }

    /// Fetch the catalog as one text blob.
    pub async fn fetch_catalog(&self) -> Result<String> {
        let url = self.catalog_url();
        let response = self.get(&url).await?;
        response
            .text()
            .await
            .map_err(|e| SrctoolError::network(&url, e))
    }

    /// Fetch the catalog checksum of one plugin archive.
    pub async fn fetch_checksum(&self, name: &PluginName) -> Result<String> {
        let text = self.fetch_catalog().await?;
        Catalog::checksum_for(&text, &self.platform, name)
    }

    /// Download a plugin archive into `dest_dir` and verify it against the
    /// catalog.
    ///
    /// The catalog checksum is fetched after the transfer completes. On a
    /// mismatch the downloaded file is deleted and
    /// [`SrctoolError::ChecksumMismatch`] is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The request fails or the server answers with an error status
    /// - The response has no `Content-Length` header
    /// - Fewer or more bytes than announced arrive
    /// - The checksum cannot be found or does not match
    pub async fn download(&self, name: &PluginName, dest_dir: &Path) -> Result<VerifiedArchive> {
        let url = self.archive_url(name);
        let response = self.get(&url).await?;

        let Some(expected_size) = response.content_length() else {
            return Err(SrctoolError::MissingContentLength { url });
        };

        let session = DownloadSession {
            url,
            expected_size,
            path: dest_dir.join(format!("{}.{ARCHIVE_EXT}", name.artifact())),
        };

        info!("downloading {name} ({expected_size} bytes)");
        let size = match session.transfer(response).await {
            Ok(size) => size,
            Err(e) => {
                session.discard().await;
                return Err(e);
            }
        };

        let expected = match self.fetch_checksum(name).await {
            Ok(digest) => digest.to_ascii_lowercase(),
            Err(e) => {
                session.discard().await;
                return Err(e);
            }
        };

        match integrity::verify(&session.path, &expected) {
            Ok(true) => {}
            Ok(false) => {
                let actual = integrity::checksum(&session.path)
                    .unwrap_or_else(|e| format!("unreadable ({e})"));
                session.discard().await;
                return Err(SrctoolError::ChecksumMismatch { expected, actual });
            }
            Err(e) => {
                session.discard().await;
                return Err(e);
            }
        }

        info!("MD5 sum verified for {name}");
        Ok(VerifiedArchive {
            path: session.path,
            digest: expected,
            size,
        })
    }

    async fn get(&self, url: &str) -> Result<Response> {
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SrctoolError::network(url, e))?;

        if !response.status().is_success() {
            return Err(SrctoolError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response)
    }
}

impl DownloadSession {
    /// Stream the body to disk, returning the number of bytes written.
    async fn transfer(&self, mut response: Response) -> Result<u64> {
        let mut out = tokio::fs::File::create(&self.path).await?;

        let bar = ProgressBar::new(self.expected_size);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("Downloading: {bar:40.cyan/blue} {bytes}/{total_bytes}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SrctoolError::network(&self.url, e))?
        {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }
        out.flush().await?;
        bar.finish_and_clear();

        if written != self.expected_size {
            return Err(SrctoolError::IncompleteDownload {
                url: self.url.clone(),
                expected: self.expected_size,
                actual: written,
            });
        }

        Ok(written)
    }

    async fn discard(&self) {
        if let Err(e) = tokio::fs::remove_file(&self.path).await {
            debug!("cannot remove {}: {e}", self.path.display());
        }
    }
}
