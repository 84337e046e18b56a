use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::warn;
use thiserror::Error;
use url::Url;

use crate::engine::models::ExpectedDigest;
use crate::hashing::{self, HashError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot derive a cache path for `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("cache I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// On-disk download cache laid out as `<root>/<host>/<url path segments...>`.
///
/// There is no file locking: two processes sharing a root can race on the
/// same entry.
#[derive(Clone, Debug)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a URL to its cache location. Pure function of the URL.
    pub fn path_for(&self, url: &str) -> Result<PathBuf, CacheError> {
        let invalid = |reason: String| CacheError::InvalidUrl {
            url: url.to_owned(),
            reason,
        };
        let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("URL has no host".into()))?;

        let mut path = match parsed.port() {
            Some(port) => self.root.join(format!("{host}_{port}")),
            None => self.root.join(host),
        };
        if let Some(segments) = parsed.path_segments() {
            for segment in segments.filter(|s| !s.is_empty() && *s != "." && *s != "..") {
                path.push(segment);
            }
        }
        Ok(path)
    }

    /// True iff `path` exists and matches `expected`. An existing file that
    /// fails verification is removed, so "invalid" and "absent" look the same
    /// to the caller afterwards.
    pub fn is_valid(
        &self,
        path: &Path,
        expected: Option<&ExpectedDigest>,
    ) -> Result<bool, CacheError> {
        if !path.is_file() {
            return Ok(false);
        }
        let (scheme, digest) = expected
            .map(|e| (e.scheme.as_str(), e.digest.as_str()))
            .unwrap_or(("", ""));
        if hashing::verify(path, scheme, digest)? {
            return Ok(true);
        }

        warn!("cache: {} failed verification, removing", path.display());
        fs::remove_file(path).map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(false)
    }

    /// Create the parent directory of a cache entry if it is missing.
    pub fn ensure_parent(&self, path: &Path) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(())
    }
}
