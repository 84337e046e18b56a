use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::result::ZipError;

/// Archive directory holding the front-end assets inside a notebook wheel.
pub const DEFAULT_ASSET_PREFIX: &str = "notebook/static/";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unreadable archive: {0}")]
    Archive(#[from] ZipError),
    #[error("archive entry `{0}` escapes the extraction directory")]
    UnsafeEntry(String),
    #[error("archive has no `{prefix}` directory")]
    MissingSubtree { prefix: String },
    #[error("destination {0} already exists")]
    DestinationExists(PathBuf),
    #[error("extraction I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Pulls one directory subtree out of a zip archive.
#[derive(Clone, Debug)]
pub struct AssetExtractor {
    prefix: String,
}

impl Default for AssetExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_PREFIX)
    }
}

impl AssetExtractor {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        Self {
            prefix: format!("{trimmed}/"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Extract every archive member under the prefix and move the subtree to
    /// `dest`, with the prefix stripped.
    ///
    /// Members are unpacked into a scratch directory next to `dest` that is
    /// removed on every exit path. `dest` must not exist yet.
    pub fn extract(&self, archive_path: &Path, dest: &Path) -> Result<(), ExtractError> {
        if dest.exists() {
            return Err(ExtractError::DestinationExists(dest.to_path_buf()));
        }
        let parent = dest
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;
        let scratch = tempfile::Builder::new()
            .prefix(".nbstatic-")
            .tempdir_in(parent)?;

        info!(
            "extract: unpacking {} from {}",
            self.prefix(),
            archive_path.display()
        );
        let count = self.unpack_filtered(archive_path, scratch.path())?;
        debug!("extract: {count} files unpacked into {}", scratch.path().display());

        let subtree = self
            .prefix
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(scratch.path().to_path_buf(), |path, segment| path.join(segment));
        if !subtree.is_dir() {
            return Err(ExtractError::MissingSubtree {
                prefix: self.prefix.clone(),
            });
        }
        relocate(&subtree, dest)?;
        Ok(())
    }

    fn unpack_filtered(&self, archive_path: &Path, scratch: &Path) -> Result<usize, ExtractError> {
        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;
        let mut count = 0;
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            if !entry.name().starts_with(&self.prefix) {
                continue;
            }
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| ExtractError::UnsafeEntry(entry.name().to_owned()))?;
            let out_path = scratch.join(relative);
            if entry.is_dir() {
                fs::create_dir_all(&out_path)?;
                continue;
            }
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out_file = File::create(&out_path)?;
            io::copy(&mut entry, &mut out_file)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Move a directory, copying when a plain rename is not possible.
fn relocate(from: &Path, to: &Path) -> Result<(), ExtractError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    warn!(
        "extract: rename to {} failed, copying instead",
        to.display()
    );
    copy_tree(from, to)
}

/// Recursive copy that leaves no partial `to` behind on failure, since an
/// existing destination counts as a finished version.
fn copy_tree(from: &Path, to: &Path) -> Result<(), ExtractError> {
    let copied = WalkDir::new(from).into_iter().try_for_each(|entry| {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
        } else {
            fs::copy(entry.path(), &target).map(drop)
        }
    });
    if let Err(err) = copied {
        if to.exists()
            && let Err(cleanup) = fs::remove_dir_all(to)
        {
            warn!("extract: could not remove partial copy {}: {cleanup}", to.display());
        }
        return Err(err.into());
    }
    Ok(())
}
