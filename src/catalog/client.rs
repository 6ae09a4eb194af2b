// src/catalog/client.rs

//! HTTP client for channel indices and package archives
//!
//! Wraps a blocking reqwest client with retry support. `file://` URLs are
//! served straight from disk so local channels need no server.
//! Only transient failures (connection errors, timeouts, 5xx and 429
//! responses) are retried, with exponential backoff.

use indicatif::ProgressBar;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default timeout for HTTP requests (60 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum attempts for one request
const MAX_RETRIES: u32 = 3;

/// Base retry delay in milliseconds, doubled per attempt
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads (64 KB)
const STREAM_BUFFER_SIZE: usize = 65536;

/// Resolve a `file://` URL to a local path
pub fn file_url_path(url: &str) -> Option<PathBuf> {
    if !url.starts_with("file://") {
        return None;
    }
    url::Url::parse(url).ok()?.to_file_path().ok()
}

/// Classify an HTTP status: `None` on success, else the error to report
fn status_error(url: &str, status: StatusCode) -> Option<Error> {
    if status.is_success() {
        return None;
    }
    let message = format!("HTTP {status}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Some(Error::transient(url, message))
    } else {
        Some(Error::catalog(url, message))
    }
}

/// HTTP client wrapper with retry support
#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl CatalogClient {
    /// Create a new client with the default retry policy
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("constructor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::catalog("(client)", format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Override the retry policy
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    fn retry<T>(&self, url: &str, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_delay * 2u32.pow(attempt - 1);
                    warn!("{} attempt {} for {} failed: {}, retrying...", what, attempt, url, e);
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a URL into memory
    pub fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if let Some(path) = file_url_path(url) {
            debug!("Reading {}", path.display());
            return fs::read(&path).map_err(|e| Error::catalog(url, e.to_string()));
        }

        self.retry(url, "Fetch", || {
            let response = self
                .client
                .get(url)
                .send()
                .map_err(|e| Error::transient(url, e.to_string()))?;
            if let Some(err) = status_error(url, response.status()) {
                return Err(err);
            }
            let bytes = response
                .bytes()
                .map_err(|e| Error::transient(url, format!("failed to read response: {e}")))?;
            Ok(bytes.to_vec())
        })
    }

    /// Download `url` to `dest_path` through a temporary file and rename
    ///
    /// Returns the number of bytes written.
    pub fn download_file(
        &self,
        url: &str,
        dest_path: &Path,
        progress_bar: Option<&ProgressBar>,
    ) -> Result<u64> {
        info!("Downloading {} to {}", url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_at(parent, e))?;
        }
        let file_name = dest_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = dest_path.with_file_name(format!(".{file_name}.{}.part", std::process::id()));

        let result = if let Some(src) = file_url_path(url) {
            fs::copy(&src, &temp_path).map_err(|e| Error::catalog(url, e.to_string()))
        } else {
            self.retry(url, "Download", || {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .map_err(|e| Error::transient(url, e.to_string()))?;
                if let Some(err) = status_error(url, response.status()) {
                    return Err(err);
                }
                let total = response.content_length().unwrap_or(0);
                let mut file = File::create(&temp_path).map_err(|e| Error::io_at(&temp_path, e))?;
                stream_to_file(url, response, &mut file, total, progress_bar)
            })
        };

        let written = match result {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        fs::rename(&temp_path, dest_path).map_err(|e| Error::io_at(dest_path, e))?;
        debug!("Downloaded {} bytes to {}", written, dest_path.display());
        Ok(written)
    }
}

fn stream_to_file(
    url: &str,
    mut response: reqwest::blocking::Response,
    file: &mut File,
    total_size: u64,
    progress_bar: Option<&ProgressBar>,
) -> Result<u64> {
    if let (Some(pb), true) = (progress_bar, total_size > 0) {
        pb.set_length(total_size);
    }

    let mut downloaded: u64 = 0;
    let mut buffer = vec![0u8; STREAM_BUFFER_SIZE];
    loop {
        let n = response
            .read(&mut buffer)
            .map_err(|e| Error::transient(url, format!("failed to read response: {e}")))?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n])?;
        downloaded += n as u64;
        if let Some(pb) = progress_bar {
            pb.set_position(downloaded);
        }
    }
    file.sync_all()?;
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_url_path() {
        assert_eq!(
            file_url_path("file:///tmp/local/noarch/repodata.json"),
            Some(PathBuf::from("/tmp/local/noarch/repodata.json"))
        );
        assert_eq!(file_url_path("https://repo.example.com/main"), None);
    }

    #[test]
    fn test_status_classification() {
        assert!(status_error("u", StatusCode::OK).is_none());
        assert!(status_error("u", StatusCode::BAD_GATEWAY).unwrap().is_transient());
        assert!(status_error("u", StatusCode::TOO_MANY_REQUESTS).unwrap().is_transient());
        assert!(!status_error("u", StatusCode::NOT_FOUND).unwrap().is_transient());
    }

    #[test]
    fn test_retry_stops_on_permanent_error() {
        let client = CatalogClient::new()
            .unwrap()
            .with_retries(5, Duration::from_millis(1));
        let mut calls = 0;
        let result: Result<()> = client.retry("u", "Fetch", || {
            calls += 1;
            Err(Error::catalog("u", "HTTP 404"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);

        let mut calls = 0;
        let result: Result<()> = client.retry("u", "Fetch", || {
            calls += 1;
            Err(Error::transient("u", "timeout"))
        });
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_local_download_is_atomic() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a-1-0.conda");
        fs::write(&src, b"payload").unwrap();
        let url = url::Url::from_file_path(&src).unwrap().to_string();

        let dest = dir.path().join("cache").join("a-1-0.conda");
        let client = CatalogClient::new().unwrap();
        assert_eq!(client.download_file(&url, &dest, None).unwrap(), 7);
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        let leftovers: Vec<_> = fs::read_dir(dest.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());

        assert!(client.fetch_bytes("file:///nonexistent/repodata.json").is_err());
    }
}
