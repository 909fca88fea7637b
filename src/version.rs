use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::UpgradeError;

// e.g. .../snal_v2/7.3.63/index/index.php or .../snal_v2/7.3.63-test/index/index.php
static VERSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]\.[0-9]\.[0-9]+(?:-[A-Za-z0-9_]+)?)/").unwrap());

const ACCEPTED_SUFFIXES: &[&str] = &[".php", ".zip"];

/// Version identifier of a hybrid template release, taken from its download url.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionTag(String);

impl VersionTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves the tag from a download url, or `None` when the url has
    /// the wrong extension or no version segment before a `/`.
    pub fn from_url(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.is_empty() || !ACCEPTED_SUFFIXES.iter().any(|suffix| url.ends_with(suffix)) {
            return None;
        }
        VERSION_SEGMENT
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|tag| Self(tag.as_str().to_string()))
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionTag {
    type Err = UpgradeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_url(value).ok_or_else(|| UpgradeError::InvalidUrl(value.to_string()))
    }
}

pub fn validate_url(url: &str) -> Option<VersionTag> {
    VersionTag::from_url(url)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parses_plain_release() {
        let tag = validate_url("http://mjs.example.cn//wap/project/snal_v2/7.3.63/index/index.php")
            .unwrap();
        assert_eq!(tag.as_str(), "7.3.63");
    }

    #[test]
    fn parses_suffixed_release() {
        let tag = validate_url("http://host/project/snal_v2/7.3.63-test/index/index.zip").unwrap();
        assert_eq!(tag.as_str(), "7.3.63-test");
    }

    #[test]
    fn rejects_wrong_extension() {
        assert!(validate_url("http://host/project/snal_v2/7.3.63/index/index.html").is_none());
        assert!(validate_url("http://host/project/7.3.63/index/indexphp").is_none());
    }

    #[test]
    fn rejects_missing_version() {
        assert!(validate_url("http://host/index.php").is_none());
        assert!(validate_url("").is_none());
        // the version must be followed by a path separator
        assert!(validate_url("http://host/project/7.3.63.zip").is_none());
    }

    #[test]
    fn from_str_reports_invalid_url() {
        let err = "http://host/index.html".parse::<VersionTag>().unwrap_err();
        assert_matches!(err, UpgradeError::InvalidUrl(_));
    }
}
