//! Mapping recorded versions to upstream tags.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

use crate::{Error, Result};

fn recorded_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"version v?(\d+(?:\.\d+)*)").unwrap_or_else(|_| unreachable!())
    })
}

/// Extract the version number recorded in free-form text, such as a module
/// README (`version v1.11.2` gives `1.11.2`).
#[must_use]
pub fn recorded_version(text: &str) -> Option<String> {
    recorded_version_pattern()
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Parse a tag into its numeric components after dropping the leading
/// non-digit prefix (`v1.10.0` gives `[1, 10, 0]`).
///
/// Returns `None` for tags that are not purely dotted numbers.
#[must_use]
pub fn parse_version(tag: &str) -> Option<Vec<u64>> {
    let digits = tag.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() {
        return None;
    }
    digits
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

fn compare_versions(a: &[u64], b: &[u64]) -> Ordering {
    a.cmp(b)
}

/// Resolve the upstream tag the downstream module is currently based on.
///
/// A tag whose numeric value equals the recorded version is preferred; the
/// first tag containing the version text is used otherwise.
///
/// # Errors
///
/// Returns [`Error::MissingVersion`] when `text` records no version and
/// [`Error::VersionNotFound`] when no tag matches.
pub fn find_current_baseline(text: &str, origin: &str, tags: &[String]) -> Result<String> {
    let version = recorded_version(text).ok_or_else(|| Error::MissingVersion {
        path: origin.to_owned(),
    })?;
    let wanted = parse_version(&version);

    if let Some(exact) = tags
        .iter()
        .find(|tag| wanted.is_some() && parse_version(tag) == wanted)
    {
        return Ok(exact.clone());
    }
    tags.iter()
        .find(|tag| tag.contains(&version))
        .cloned()
        .ok_or(Error::VersionNotFound { version })
}

/// Highest tag by numeric tuple ordering; malformed tags are ignored.
///
/// # Errors
///
/// Returns [`Error::NoTags`] when no tag parses as a version.
pub fn select_latest(tags: &[String]) -> Result<String> {
    tags.iter()
        .filter_map(|tag| parse_version(tag).map(|parsed| (parsed, tag)))
        .max_by(|(a, _), (b, _)| compare_versions(a, b))
        .map(|(_, tag)| tag.clone())
        .ok_or(Error::NoTags)
}

/// Exact membership check for a tag requested by the caller.
///
/// # Errors
///
/// Returns [`Error::VersionNotFound`] when `requested` is not a tag.
pub fn select_requested(tags: &[String], requested: &str) -> Result<String> {
    tags.iter()
        .find(|tag| tag.as_str() == requested)
        .cloned()
        .ok_or_else(|| Error::VersionNotFound {
            version: requested.to_owned(),
        })
}

/// Whether two version strings denote the same release, tolerating prefix
/// variants such as `v1.5.0` and `1.5.0`.
#[must_use]
pub fn same_version(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}
