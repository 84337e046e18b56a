use std::fs;
use std::io;
use std::path::PathBuf;

use log::{error, info, warn};
use thiserror::Error;
use url::Url;

use crate::engine::models::Project;
use crate::engine::state::{RunSummary, SkipReason, VersionOutcome};
use crate::env::Settings;
use crate::extract::AssetExtractor;
use crate::index::IndexError;
use crate::networking::{DownloadError, Downloader, Transport};
use crate::storage::CacheStore;
use crate::versioning;

pub mod models;
pub mod state;

/// Errors that end the whole run rather than a single version.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("cannot prepare output directory {path}: {source}")]
    Output { path: PathBuf, source: io::Error },
}

/// Pick the first candidate whose URL path names a wheel.
pub fn select_wheel(urls: &[String]) -> Option<&str> {
    urls.iter()
        .map(String::as_str)
        .find(|url| url_path(url).ends_with(".whl"))
}

fn url_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_owned(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_owned(),
    }
}

/// Drives every version of a project through select, download and extract.
pub struct ReleasePipeline<T> {
    output_dir: PathBuf,
    cache: CacheStore,
    extractor: AssetExtractor,
    transport: T,
}

impl<T: Transport> ReleasePipeline<T> {
    pub fn new(settings: &Settings, transport: T) -> Self {
        Self {
            output_dir: settings.output_dir.clone(),
            cache: CacheStore::new(&settings.cache_dir),
            extractor: AssetExtractor::new(&settings.asset_prefix),
            transport,
        }
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Process every version in ascending order. Per-version problems are
    /// logged and counted; only fatal errors stop the run.
    pub async fn run(&self, project: &Project) -> Result<RunSummary, PipelineError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| PipelineError::Output {
            path: self.output_dir.clone(),
            source,
        })?;
        info!(
            "pipeline: {} versions of {} into {}",
            project.urls.len(),
            project.name,
            self.output_dir.display()
        );

        let mut summary = RunSummary::default();
        for version in versioning::sort_versions(project.urls.keys().cloned()) {
            let urls = project.urls.get(&version).map(Vec::as_slice).unwrap_or_default();
            let outcome = self.process_version(&version, urls, project).await?;
            summary.record(&outcome);
        }

        info!("pipeline: finished: {summary}");
        Ok(summary)
    }

    pub async fn process_version(
        &self,
        version: &str,
        urls: &[String],
        project: &Project,
    ) -> Result<VersionOutcome, PipelineError> {
        if !versioning::is_safe_dir_name(version) {
            warn!(
                "pipeline: {version:?}: {}, skipping",
                SkipReason::UnsafeVersion.label()
            );
            return Ok(VersionOutcome::Skipped(SkipReason::UnsafeVersion));
        }
        let dest = self.output_dir.join(version);
        if dest.exists() {
            info!(
                "pipeline: {version}: {} at {}, skipping",
                SkipReason::DestinationExists.label(),
                dest.display()
            );
            return Ok(VersionOutcome::Skipped(SkipReason::DestinationExists));
        }

        let Some(url) = select_wheel(urls) else {
            warn!("pipeline: {version}: {}, skipping", SkipReason::NoWheel.label());
            return Ok(VersionOutcome::Skipped(SkipReason::NoWheel));
        };

        let downloader = Downloader::new(&self.cache, &self.transport);
        let Some(archive) = downloader.fetch(url, project.digests.get(url)).await? else {
            error!(
                "pipeline: {version}: {}, skipping",
                SkipReason::HashMismatch.label()
            );
            return Ok(VersionOutcome::Skipped(SkipReason::HashMismatch));
        };

        match self.extractor.extract(&archive, &dest) {
            Ok(()) => {
                info!("pipeline: {version}: static assets written to {}", dest.display());
                Ok(VersionOutcome::Done(dest))
            }
            Err(err) => {
                error!("pipeline: {version}: extraction failed: {err}");
                Ok(VersionOutcome::Failed(err))
            }
        }
    }
}
