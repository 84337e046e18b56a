//! Content digests for cached artifacts.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("unsupported hash scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("failed to read {path} for hashing: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Hash algorithms an index may name next to a file URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashScheme {
    pub fn parse(name: &str) -> Result<Self, HashError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(HashScheme::Md5),
            "sha1" => Ok(HashScheme::Sha1),
            "sha224" => Ok(HashScheme::Sha224),
            "sha256" => Ok(HashScheme::Sha256),
            "sha384" => Ok(HashScheme::Sha384),
            "sha512" => Ok(HashScheme::Sha512),
            _ => Err(HashError::UnsupportedScheme(name.to_owned())),
        }
    }
}

/// Compute the lowercase hex digest of the file at `path`.
pub fn file_digest(path: &Path, scheme: HashScheme) -> Result<String, HashError> {
    let io_err = |source| HashError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let digest = match scheme {
        HashScheme::Md5 => hex_digest::<Md5>(&mut file),
        HashScheme::Sha1 => hex_digest::<Sha1>(&mut file),
        HashScheme::Sha224 => hex_digest::<Sha224>(&mut file),
        HashScheme::Sha256 => hex_digest::<Sha256>(&mut file),
        HashScheme::Sha384 => hex_digest::<Sha384>(&mut file),
        HashScheme::Sha512 => hex_digest::<Sha512>(&mut file),
    };
    digest.map_err(io_err)
}

/// Check the file at `path` against an expected hex digest.
///
/// An empty `digest` means no verification was requested and always passes,
/// without looking at `scheme` or the file. The comparison is case-sensitive.
///
/// # Errors
/// Returns [`HashError::UnsupportedScheme`] when `scheme` names an unknown
/// algorithm, or [`HashError::Io`] when the file cannot be read.
pub fn verify(path: &Path, scheme: &str, digest: &str) -> Result<bool, HashError> {
    if digest.is_empty() {
        return Ok(true);
    }
    let scheme = HashScheme::parse(scheme)?;
    let actual = file_digest(path, scheme)?;
    Ok(actual == digest)
}

fn hex_digest<D: Digest>(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 8192];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect())
}
