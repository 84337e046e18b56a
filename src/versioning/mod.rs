use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PreKind {
    Alpha,
    Beta,
    Candidate,
}

/// A release version, parsed leniently from the index's version strings.
#[derive(Clone, Debug)]
pub struct Version {
    epoch: u64,
    release: Vec<u64>,
    pre: Option<(PreKind, u64)>,
    post: Option<u64>,
    dev: Option<u64>,
}

impl Version {
    /// Parse a version such as `6.4.12`, `7.0.0rc2`, `1!2.0.post1` or
    /// `5.0.dev3`. Local labels (`+ubuntu1`) are accepted and ignored.
    pub fn parse(input: &str) -> Option<Self> {
        let text = normalize_version(input);
        let text = text.split_once('+').map_or(text.as_str(), |(public, _)| public);
        let (epoch, rest) = match text.split_once('!') {
            Some((epoch, rest)) => (epoch.parse().ok()?, rest),
            None => (0, text),
        };

        let release_end = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(rest.len());
        let release = parse_version_parts(rest[..release_end].trim_end_matches('.'))?;

        let mut version = Version {
            epoch,
            release,
            pre: None,
            post: None,
            dev: None,
        };

        let mut tail = &rest[release_end..];
        loop {
            tail = tail.trim_start_matches(['.', '-', '_']);
            if tail.is_empty() {
                break;
            }
            let label_end = tail
                .find(|ch: char| !ch.is_ascii_alphabetic())
                .unwrap_or(tail.len());
            let (label, after) = tail.split_at(label_end);
            let after = after.trim_start_matches(['.', '-', '_']);
            let digits_end = after
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(after.len());
            if label.is_empty() && digits_end == 0 {
                return None;
            }
            let number = if digits_end == 0 {
                0
            } else {
                after[..digits_end].parse().ok()?
            };

            let slot_taken = match label {
                "a" | "alpha" => version.pre.replace((PreKind::Alpha, number)).is_some(),
                "b" | "beta" => version.pre.replace((PreKind::Beta, number)).is_some(),
                "c" | "rc" | "pre" | "preview" => {
                    version.pre.replace((PreKind::Candidate, number)).is_some()
                }
                "post" | "rev" | "r" | "" => version.post.replace(number).is_some(),
                "dev" => version.dev.replace(number).is_some(),
                _ => return None,
            };
            if slot_taken {
                return None;
            }
            tail = &after[digits_end..];
        }

        Some(version)
    }

    /// Sort key for the pre/post/dev segments: a bare dev release sorts
    /// before any pre-release, a final release after all of them.
    fn suffix_key(&self) -> ((u8, u64), (u8, u64), (u8, u64)) {
        let pre = match (self.pre, self.post, self.dev) {
            (None, None, Some(_)) => (0, 0),
            (Some((kind, n)), _, _) => (1 + kind as u8, n),
            (None, _, _) => (4, 0),
        };
        let post = self.post.map_or((0, 0), |n| (1, n));
        let dev = self.dev.map_or((1, 0), |n| (0, n));
        (pre, post, dev)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| compare_release(&self.release, &other.release))
            .then_with(|| self.suffix_key().cmp(&other.suffix_key()))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Sort version strings ascending. Strings that do not parse as versions go
/// last, in lexicographic order.
pub fn sort_versions<I, S>(versions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut keyed: Vec<(Option<Version>, String)> = versions
        .into_iter()
        .map(|raw| {
            let raw: String = raw.into();
            (Version::parse(&raw), raw)
        })
        .collect();
    keyed.sort_by(|(a, a_raw), (b, b_raw)| match (a, b) {
        (Some(a), Some(b)) => a.cmp(b).then_with(|| a_raw.cmp(b_raw)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a_raw.cmp(b_raw),
    });
    keyed.into_iter().map(|(_, raw)| raw).collect()
}

/// Whether `version` can be used as a single directory name under the
/// output base: no separators, no `.`/`..`, nothing a path could treat as a
/// root or drive prefix.
pub fn is_safe_dir_name(version: &str) -> bool {
    !matches!(version, "" | "." | "..")
        && version
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '!' | '+' | '_' | '-'))
}

/// Normalize version string by removing 'v' prefix and cleaning up.
fn normalize_version(version: &str) -> String {
    version
        .trim()
        .to_ascii_lowercase()
        .trim_start_matches('v')
        .to_owned()
}

/// Compare release segments, treating missing trailing segments as zero.
fn compare_release(a: &[u64], b: &[u64]) -> Ordering {
    let max_len = a.len().max(b.len());
    for i in 0..max_len {
        let a_part = a.get(i).copied().unwrap_or(0);
        let b_part = b.get(i).copied().unwrap_or(0);
        match a_part.cmp(&b_part) {
            Ordering::Equal => continue,
            unequal => return unequal,
        }
    }
    Ordering::Equal
}

/// Parse version string into parts (e.g., "0.1.5" -> [0, 1, 5]).
fn parse_version_parts(version: &str) -> Option<Vec<u64>> {
    version
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}
