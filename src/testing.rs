//! Test doubles shared by the module tests.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use sha2::{Digest, Sha256};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::networking::{Page, Transport, TransportError};

/// In-memory transport that counts every request it serves.
#[derive(Default)]
pub struct MemoryTransport {
    files: HashMap<String, Vec<u8>>,
    pages: HashMap<String, Page>,
    truncated: HashMap<String, Vec<u8>>,
    downloads: AtomicUsize,
    page_requests: AtomicUsize,
}

impl MemoryTransport {
    pub fn with_file(mut self, url: &str, bytes: &[u8]) -> Self {
        self.files.insert(url.to_owned(), bytes.to_vec());
        self
    }

    /// Serve `bytes` for `url`, then fail as if the connection dropped
    /// halfway through the body.
    pub fn with_truncated_file(mut self, url: &str, bytes: &[u8]) -> Self {
        self.truncated.insert(url.to_owned(), bytes.to_vec());
        self
    }

    pub fn with_page(mut self, url: &str, content_type: &str, body: &str) -> Self {
        self.pages.insert(
            url.to_owned(),
            Page {
                url: url.to_owned(),
                content_type: Some(content_type.to_owned()),
                body: body.to_owned(),
            },
        );
        self
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, TransportError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(partial) = self.truncated.get(url) {
            std::fs::write(dest, partial).map_err(|source| TransportError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
            return Err(TransportError::Incomplete {
                url: url.to_owned(),
                received: partial.len() as u64,
                expected: partial.len() as u64 * 2,
            });
        }
        let bytes = self.files.get(url).ok_or_else(|| TransportError::Status {
            url: url.to_owned(),
            status: 404,
        })?;
        std::fs::write(dest, bytes).map_err(|source| TransportError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }

    async fn fetch_page(&self, url: &str) -> Result<Page, TransportError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| TransportError::Status {
                url: url.to_owned(),
                status: 404,
            })
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Build a zip archive in memory from `(name, contents)` pairs. Names ending
/// in `/` become directory entries.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let stored =
        || SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        if let Some(dir) = name.strip_suffix('/') {
            writer.add_directory(dir, stored()).unwrap();
        } else {
            writer.start_file(*name, stored()).unwrap();
            writer.write_all(contents).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// A wheel with two static assets plus unrelated package files.
pub fn sample_wheel() -> Vec<u8> {
    build_zip(&[
        ("notebook/__init__.py", b"__version__ = '1.0'"),
        ("notebook/static/", b""),
        ("notebook/static/a.js", b"console.log('a');"),
        ("notebook/static/b.css", b"body { margin: 0; }"),
        ("notebook/templates/page.html", b"<html></html>"),
        ("notebook-1.0.dist-info/METADATA", b"Name: notebook"),
    ])
}
