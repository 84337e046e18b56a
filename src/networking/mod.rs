use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::engine::models::ExpectedDigest;
use crate::storage::{CacheError, CacheStore};

const USER_AGENT: &str = concat!("nbstatic-fetch/", env!("CARGO_PKG_VERSION"));
const SIMPLE_INDEX_ACCEPT: &str = "application/vnd.pypi.simple.v1+json, \
     application/vnd.pypi.simple.v1+html;q=0.2, text/html;q=0.01";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("download of {url} incomplete: received {received} of {expected} bytes")]
    Incomplete {
        url: String,
        received: u64,
        expected: u64,
    },
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// A fetched index page.
#[derive(Clone, Debug)]
pub struct Page {
    /// Final URL after redirects; relative links resolve against it.
    pub url: String,
    pub content_type: Option<String>,
    pub body: String,
}

impl Page {
    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }
}

/// Network seam used by the downloader and the index locator.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Stream `url` into `dest`, replacing any previous content. Returns the
    /// number of bytes written.
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, TransportError>;

    /// Fetch an index page as text.
    async fn fetch_page(&self, url: &str) -> Result<Page, TransportError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        // Connect timeout only: wheel downloads can legitimately take a while.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    async fn get(&self, url: &str, accept: Option<&str>) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        let response = request.send().await.map_err(|source| TransportError::Request {
            url: url.to_owned(),
            source,
        })?;
        if !response.status().is_success() {
            return Err(TransportError::Status {
                url: url.to_owned(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

impl Transport for HttpTransport {
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        let response = self.get(url, None).await?;
        let io_err = |source| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let parent = dest
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // The body lands in a sibling temp file that is only renamed onto
        // `dest` once complete; dropping `temp_path` on error removes it.
        let (std_file, temp_path) = tempfile::Builder::new()
            .prefix(".nbstatic-")
            .tempfile_in(parent)
            .map_err(io_err)?
            .into_parts();
        let mut file = File::from_std(std_file);

        let total = response.content_length();
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| TransportError::Request {
                url: url.to_owned(),
                source,
            })?;
            file.write_all(&chunk).await.map_err(io_err)?;
            downloaded += chunk.len() as u64;

            let since = last_tick.elapsed().as_secs_f32();
            if since > 1.0 {
                let speed = (downloaded - last_bytes) as f32 / since;
                debug!(
                    "download: {:.0}% of {} ({})",
                    progress_percent(downloaded, total),
                    url,
                    format_speed(speed)
                );
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }

        file.flush().await.map_err(io_err)?;
        drop(file);
        ensure_complete(url, downloaded, total)?;
        temp_path.persist(dest).map_err(|err| io_err(err.error))?;
        Ok(downloaded)
    }

    async fn fetch_page(&self, url: &str) -> Result<Page, TransportError> {
        let response = self.get(url, Some(SIMPLE_INDEX_ACCEPT)).await?;
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response
            .text()
            .await
            .map_err(|source| TransportError::Request {
                url: url.to_owned(),
                source,
            })?;
        Ok(Page {
            url: final_url,
            content_type,
            body,
        })
    }
}

/// A body shorter than the advertised `Content-Length` is an error.
fn ensure_complete(url: &str, received: u64, total: Option<u64>) -> Result<(), TransportError> {
    if let Some(expected) = total
        && received < expected
    {
        return Err(TransportError::Incomplete {
            url: url.to_owned(),
            received,
            expected,
        });
    }
    Ok(())
}

/// Render a human-friendly transfer speed string.
#[must_use]
fn format_speed(bytes_per_sec: f32) -> String {
    const KIB: f32 = 1024.0;
    const MIB: f32 = KIB * 1024.0;

    if bytes_per_sec < KIB {
        format!("{bytes_per_sec:.0} B/s")
    } else if bytes_per_sec < MIB {
        format!("{:.1} KiB/s", bytes_per_sec / KIB)
    } else {
        format!("{:.1} MiB/s", bytes_per_sec / MIB)
    }
}

#[must_use]
fn progress_percent(downloaded: u64, total: Option<u64>) -> f32 {
    match total {
        Some(total) if total > 0 => (downloaded as f32 / total as f32) * 100.0,
        _ => 0.0,
    }
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Cache-aware fetch of a single URL.
pub struct Downloader<'a, T> {
    cache: &'a CacheStore,
    transport: &'a T,
}

impl<'a, T: Transport> Downloader<'a, T> {
    pub fn new(cache: &'a CacheStore, transport: &'a T) -> Self {
        Self { cache, transport }
    }

    /// Return a verified local copy of `url`, downloading it when the cache
    /// has no valid entry.
    ///
    /// `Ok(None)` means the downloaded bytes did not match `expected`; the
    /// mismatched file has already been removed so a later run retries.
    pub async fn fetch(
        &self,
        url: &str,
        expected: Option<&ExpectedDigest>,
    ) -> Result<Option<PathBuf>, DownloadError> {
        let dest = self.cache.path_for(url)?;
        if self.cache.is_valid(&dest, expected)? {
            info!("download: cache hit for {url}");
            return Ok(Some(dest));
        }

        self.cache.ensure_parent(&dest)?;
        info!("download: fetching {url}");
        let bytes = match self.transport.download_to(url, &dest).await {
            Ok(bytes) => bytes,
            Err(err) => {
                // A partial body must not pass for a cache entry on the next run.
                if dest.exists()
                    && let Err(remove_err) = fs::remove_file(&dest)
                {
                    warn!(
                        "download: could not remove partial file {}: {remove_err}",
                        dest.display()
                    );
                }
                return Err(err.into());
            }
        };
        debug!("download: wrote {bytes} bytes to {}", dest.display());

        if self.cache.is_valid(&dest, expected)? {
            Ok(Some(dest))
        } else {
            error!("download: hash mismatch for {url}, discarded downloaded file");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::HashError;
    use crate::testing::{MemoryTransport, sha256_hex};
    use tempfile::TempDir;

    const URL: &str = "https://files.example/pkg/pkg-1.0-py3-none-any.whl";

    #[tokio::test]
    async fn downloads_into_cache_layout() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        let transport = MemoryTransport::default().with_file(URL, b"wheel");
        let expected = ExpectedDigest::new("sha256", sha256_hex(b"wheel"));

        let path = Downloader::new(&cache, &transport)
            .fetch(URL, Some(&expected))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            path,
            dir.path()
                .join("files.example")
                .join("pkg")
                .join("pkg-1.0-py3-none-any.whl")
        );
        assert_eq!(fs::read(&path).unwrap(), b"wheel");
        assert_eq!(transport.downloads(), 1);
    }

    #[tokio::test]
    async fn cache_hit_makes_no_network_call() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        let cached = cache.path_for(URL).unwrap();
        cache.ensure_parent(&cached).unwrap();
        fs::write(&cached, b"wheel").unwrap();

        let transport = MemoryTransport::default().with_file(URL, b"wheel");
        let expected = ExpectedDigest::new("sha256", sha256_hex(b"wheel"));
        let path = Downloader::new(&cache, &transport)
            .fetch(URL, Some(&expected))
            .await
            .unwrap();

        assert_eq!(path, Some(cached));
        assert_eq!(transport.downloads(), 0);
    }

    #[tokio::test]
    async fn corrupted_entry_is_redownloaded_once() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        let cached = cache.path_for(URL).unwrap();
        cache.ensure_parent(&cached).unwrap();
        fs::write(&cached, b"truncated wh").unwrap();

        let transport = MemoryTransport::default().with_file(URL, b"wheel");
        let expected = ExpectedDigest::new("sha256", sha256_hex(b"wheel"));
        let downloader = Downloader::new(&cache, &transport);

        let path = downloader.fetch(URL, Some(&expected)).await.unwrap().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"wheel");
        assert_eq!(transport.downloads(), 1);

        downloader.fetch(URL, Some(&expected)).await.unwrap().unwrap();
        assert_eq!(transport.downloads(), 1);
    }

    #[tokio::test]
    async fn mismatched_download_is_discarded() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        let transport = MemoryTransport::default().with_file(URL, b"evil wheel");
        let expected = ExpectedDigest::new("sha256", sha256_hex(b"wheel"));

        let result = Downloader::new(&cache, &transport)
            .fetch(URL, Some(&expected))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(!cache.path_for(URL).unwrap().exists());
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        let transport = MemoryTransport::default();

        let err = Downloader::new(&cache, &transport)
            .fetch(URL, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Transport(TransportError::Status { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn interrupted_download_leaves_nothing_in_the_cache() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        let transport = MemoryTransport::default().with_truncated_file(URL, b"half a wh");
        let downloader = Downloader::new(&cache, &transport);

        let err = downloader.fetch(URL, None).await.unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Transport(TransportError::Incomplete { received: 9, .. })
        ));
        assert!(!cache.path_for(URL).unwrap().exists());

        // Without a published digest the next attempt still goes to the network.
        downloader.fetch(URL, None).await.unwrap_err();
        assert_eq!(transport.downloads(), 2);
    }

    #[test]
    fn short_bodies_are_incomplete() {
        assert!(ensure_complete(URL, 10, Some(10)).is_ok());
        assert!(ensure_complete(URL, 10, None).is_ok());
        let err = ensure_complete(URL, 4, Some(10)).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("download of {URL} incomplete: received 4 of 10 bytes")
        );
    }

    #[test]
    fn formats_speed_in_binary_units() {
        assert_eq!(format_speed(512.0), "512 B/s");
        assert_eq!(format_speed(2_048.0), "2.0 KiB/s");
        assert_eq!(format_speed(5_242_880.0), "5.0 MiB/s");
    }

    #[test]
    fn progress_is_zero_without_a_known_length() {
        assert_eq!(progress_percent(5, Some(10)), 50.0);
        assert_eq!(progress_percent(5, None), 0.0);
        assert_eq!(progress_percent(5, Some(0)), 0.0);
    }

    #[tokio::test]
    async fn unsupported_scheme_is_fatal() {
        let dir = TempDir::new().unwrap();
        let cache = CacheStore::new(dir.path());
        let transport = MemoryTransport::default().with_file(URL, b"wheel");
        let expected = ExpectedDigest::new("blake2b_256", "00");

        let err = Downloader::new(&cache, &transport)
            .fetch(URL, Some(&expected))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::Cache(CacheError::Hash(HashError::UnsupportedScheme(_)))
        ));
    }

    #[test]
    fn detects_json_pages() {
        let page = Page {
            url: "https://pypi.example/simple/pkg/".into(),
            content_type: Some("application/vnd.pypi.simple.v1+json".into()),
            body: String::new(),
        };
        assert!(page.is_json());
        let html = Page {
            content_type: Some("text/html; charset=utf-8".into()),
            ..page
        };
        assert!(!html.is_json());
    }
}
