use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::extract::DEFAULT_ASSET_PREFIX;
use crate::index::DEFAULT_INDEX_URL;

pub const CACHE_DIR_VAR: &str = "NBSTATIC_CACHE_DIR";
pub const INDEX_URL_VAR: &str = "NBSTATIC_INDEX_URL";
pub const PACKAGE_VAR: &str = "NBSTATIC_PACKAGE";
const DEFAULT_PACKAGE: &str = "notebook";

/// Returns the per-user data directory used by the tool.
fn app_dir_from(lookup: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    let base = match env::consts::OS {
        "windows" => lookup("LOCALAPPDATA")
            .or_else(|| lookup("APPDATA"))
            .map(PathBuf::from),
        "macos" => lookup("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => lookup("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("nbstatic-fetch")
}

/// Everything a run needs to know, resolved once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub index_url: String,
    pub package: String,
    pub asset_prefix: String,
}

impl Settings {
    pub fn from_env(output_dir: PathBuf) -> Self {
        Self::from_lookup(output_dir, |key| env::var_os(key))
    }

    fn from_lookup(output_dir: PathBuf, lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let cache_dir = non_empty(CACHE_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| app_dir_from(&lookup).join("cache"));
        let index_url = non_empty(INDEX_URL_VAR)
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_INDEX_URL.to_owned());
        let package = non_empty(PACKAGE_VAR)
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_PACKAGE.to_owned());

        Self {
            output_dir,
            cache_dir,
            index_url,
            package,
            asset_prefix: DEFAULT_ASSET_PREFIX.to_owned(),
        }
    }
}
