use std::collections::{BTreeMap, HashMap};

/// Hash scheme and hex digest published by the index for one file URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedDigest {
    pub scheme: String,
    pub digest: String,
}

impl ExpectedDigest {
    pub fn new(scheme: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            digest: digest.into(),
        }
    }
}

/// Release metadata for one package, as returned by the index.
#[derive(Clone, Debug, Default)]
pub struct Project {
    pub name: String,
    /// Candidate download URLs per version, in index order.
    pub urls: BTreeMap<String, Vec<String>>,
    pub digests: HashMap<String, ExpectedDigest>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_file(&mut self, version: &str, url: String, digest: Option<ExpectedDigest>) {
        if let Some(digest) = digest {
            self.digests.insert(url.clone(), digest);
        }
        let urls = self.urls.entry(version.to_owned()).or_default();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
}
