//! Package index locator speaking the "simple" repository API, both the
//! HTML listing and its JSON variant.

use std::collections::BTreeMap;

use log::{debug, info};
use scraper::{Html, Selector};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::engine::models::{ExpectedDigest, Project};
use crate::networking::{Transport, TransportError};
use crate::versioning::is_safe_dir_name;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple";
const SDIST_SUFFIXES: [&str; 4] = [".tar.gz", ".tar.bz2", ".tgz", ".zip"];
// Strongest first.
const HASH_PREFERENCE: [&str; 6] = ["sha512", "sha384", "sha256", "sha224", "sha1", "md5"];

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid index JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid URL `{url}` on index page: {source}")]
    Url { url: String, source: url::ParseError },
    #[error("no downloadable files found for `{0}`")]
    NotFound(String),
}

#[derive(Debug, Deserialize)]
struct JsonProject {
    files: Vec<JsonFile>,
}

#[derive(Debug, Deserialize)]
struct JsonFile {
    filename: String,
    url: String,
    #[serde(default)]
    hashes: BTreeMap<String, String>,
    #[serde(default)]
    yanked: serde_json::Value,
}

/// One file listed on a project page before version grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexFile {
    filename: String,
    href: String,
    digest: Option<ExpectedDigest>,
    yanked: bool,
}

#[derive(Clone, Debug)]
pub struct SimpleIndex {
    base_url: String,
}

impl SimpleIndex {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    pub fn project_url(&self, name: &str) -> String {
        format!("{}/{}/", self.base_url, normalize_name(name))
    }

    /// Query the index for `name` and group its files by version.
    pub async fn get_project<T: Transport>(
        &self,
        transport: &T,
        name: &str,
    ) -> Result<Project, IndexError> {
        let url = self.project_url(name);
        info!("index: querying {url}");
        let page = transport.fetch_page(&url).await?;
        let files = if page.is_json() {
            parse_json(&page.body)?
        } else {
            parse_html(&page.body)
        };
        debug!("index: {} files listed at {}", files.len(), page.url);

        let project = build_project(name, &page.url, files)?;
        if project.urls.is_empty() {
            return Err(IndexError::NotFound(name.to_owned()));
        }
        info!(
            "index: {} versions available for {}",
            project.urls.len(),
            project.name
        );
        Ok(project)
    }
}

/// Normalize a project name the way the simple API expects it: lowercase,
/// with runs of `-`, `_` and `.` collapsed into a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.push(ch.to_ascii_lowercase());
    }
    out
}

fn parse_html(body: &str) -> Vec<IndexFile> {
    let document = Html::parse_document(body);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|anchor| {
            let href = anchor.value().attr("href")?.trim();
            let text = anchor.text().collect::<String>();
            let filename = match text.trim() {
                "" => filename_from_href(href)?,
                name => name.to_owned(),
            };
            Some(IndexFile {
                filename,
                href: href.to_owned(),
                digest: None,
                yanked: anchor.value().attr("data-yanked").is_some(),
            })
        })
        .collect()
}

fn parse_json(body: &str) -> Result<Vec<IndexFile>, IndexError> {
    let project: JsonProject = serde_json::from_str(body)?;
    Ok(project
        .files
        .into_iter()
        .map(|file| {
            let digest = preferred_digest(&file.hashes);
            let yanked = match &file.yanked {
                serde_json::Value::Bool(flag) => *flag,
                serde_json::Value::String(_) => true,
                _ => false,
            };
            IndexFile {
                filename: file.filename,
                href: file.url,
                digest,
                yanked,
            }
        })
        .collect())
}

/// Pick the strongest listed hash this tool can check, falling back to any
/// listed scheme so an unknown one still surfaces as a configuration error.
fn preferred_digest(hashes: &BTreeMap<String, String>) -> Option<ExpectedDigest> {
    HASH_PREFERENCE
        .iter()
        .find_map(|scheme| hashes.get(*scheme).map(|digest| (*scheme, digest)))
        .or_else(|| {
            hashes
                .iter()
                .next()
                .map(|(scheme, digest)| (scheme.as_str(), digest))
        })
        .map(|(scheme, digest)| ExpectedDigest::new(scheme, digest.as_str()))
}

fn build_project(name: &str, page_url: &str, files: Vec<IndexFile>) -> Result<Project, IndexError> {
    let base = Url::parse(page_url).map_err(|source| IndexError::Url {
        url: page_url.to_owned(),
        source,
    })?;
    let normalized = normalize_name(name);
    let mut project = Project::new(name);

    for file in files {
        if file.yanked {
            debug!("index: skipping yanked file {}", file.filename);
            continue;
        }
        let Some(version) = version_from_filename(&file.filename, &normalized) else {
            debug!("index: ignoring unrecognised file {}", file.filename);
            continue;
        };
        let mut resolved = base.join(&file.href).map_err(|source| IndexError::Url {
            url: file.href.clone(),
            source,
        })?;
        let fragment_digest = resolved.fragment().and_then(digest_from_fragment);
        resolved.set_fragment(None);
        project.add_file(&version, resolved.to_string(), file.digest.or(fragment_digest));
    }
    Ok(project)
}

fn digest_from_fragment(fragment: &str) -> Option<ExpectedDigest> {
    let (scheme, digest) = fragment.split_once('=')?;
    // Installer hints share the fragment syntax but carry no digest.
    if matches!(scheme, "egg" | "subdirectory") {
        return None;
    }
    (!scheme.is_empty() && !digest.is_empty()).then(|| ExpectedDigest::new(scheme, digest))
}

fn filename_from_href(href: &str) -> Option<String> {
    let path = href.split(['#', '?']).next()?;
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
}

/// Extract the version from a wheel or source distribution filename, if it
/// belongs to the project `normalized`.
fn version_from_filename(filename: &str, normalized: &str) -> Option<String> {
    if let Some(stem) = filename.strip_suffix(".whl") {
        let mut parts = stem.split('-');
        let dist = parts.next()?;
        let version = parts.next()?;
        return (normalize_name(dist) == normalized && is_safe_dir_name(version))
            .then(|| version.to_owned());
    }

    let stem = SDIST_SUFFIXES
        .iter()
        .find_map(|suffix| filename.strip_suffix(suffix))?;
    let (dist, version) = stem.rsplit_once('-')?;
    (normalize_name(dist) == normalized && is_safe_dir_name(version)).then(|| version.to_owned())
}
