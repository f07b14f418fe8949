//! Dedup tags identifying a failure across canary runs.
//!
//! Two tags are derived per failure:
//! - the **logs tag** follows the failure across rebuilds: same package, same
//!   (normalized) log tail;
//! - the **build tag** follows the exact derivation that failed.
//!
//! Both are embedded in filed issues and searched for before filing again.
//! Tags are truncated SHA-256 digests, so they are stable across processes and
//! machines. A collision only risks a missed report.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::FailureRecord;
use crate::normalize::NormalizedExcerpt;

/// Prefix separating canary tags from unrelated text in the search index.
pub const TAG_NAMESPACE: &str = "nixpkgs-upkeep";

/// Hex characters kept from the digest (64 bits).
pub const TAG_HEX_LEN: usize = 16;

/// An opaque search term identifying a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupTag(String);

impl DedupTag {
    /// Hash `input` into a tag.
    pub fn from_input(input: &str) -> Self {
        let digest = hex::encode(Sha256::digest(input.as_bytes()));
        DedupTag(digest[..TAG_HEX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Both tags of a classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub logs_tag: DedupTag,
    pub build_tag: DedupTag,
}

impl Fingerprint {
    /// Tags in the order they are checked.
    pub fn tags(&self) -> [&DedupTag; 2] {
        [&self.logs_tag, &self.build_tag]
    }
}

/// Tag for a package's normalized log tail.
///
/// The nixpkgs commit is deliberately absent: it changes on every run.
pub fn logs_tag(package_name_version: &str, normalized: &NormalizedExcerpt) -> DedupTag {
    DedupTag::from_input(&format!(
        "{TAG_NAMESPACE} {package_name_version} {normalized}"
    ))
}

/// Tag for a failing derivation hash.
pub fn build_tag(build_identifier: &str) -> DedupTag {
    DedupTag::from_input(&format!("{TAG_NAMESPACE} {build_identifier}"))
}

/// Compute both tags for `record`.
pub fn fingerprint(record: &FailureRecord, normalized: &NormalizedExcerpt) -> Fingerprint {
    Fingerprint {
        logs_tag: logs_tag(&record.package_name_version, normalized),
        build_tag: build_tag(&record.build_identifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::LogNormalizer;

    fn record(build_identifier: &str, excerpt: &[&str]) -> FailureRecord {
        FailureRecord {
            build_identifier: build_identifier.to_string(),
            package_name_version: "foo-1.2.3".to_string(),
            excerpt_lines: excerpt.iter().map(|s| s.to_string()).collect(),
            marker_index: 0,
            failure_log: String::new(),
        }
    }

    #[test]
    fn test_tag_shape() {
        let tag = build_tag("abcdefghijklmnopqrstuvwxyz123456");
        assert_eq!(tag.as_str().len(), TAG_HEX_LEN);
        assert!(tag
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_build_tag_is_pure() {
        let a = build_tag("abcdefghijklmnopqrstuvwxyz123456");
        let b = build_tag("abcdefghijklmnopqrstuvwxyz123456");
        let c = build_tag("bbcdefghijklmnopqrstuvwxyz123456");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_build_tag_ignores_excerpt() {
        let normalizer = LogNormalizer::new().unwrap();
        let r1 = record("abcdefghijklmnopqrstuvwxyz123456", &["> one"]);
        let r2 = record("abcdefghijklmnopqrstuvwxyz123456", &["> two"]);
        let f1 = fingerprint(&r1, &normalizer.normalize(&r1.excerpt_lines));
        let f2 = fingerprint(&r2, &normalizer.normalize(&r2.excerpt_lines));
        assert_eq!(f1.build_tag, f2.build_tag);
        assert_ne!(f1.logs_tag, f2.logs_tag);
    }

    #[test]
    fn test_logs_tag_depends_on_package() {
        let normalizer = LogNormalizer::new().unwrap();
        let excerpt = normalizer.normalize(&["> boom"]);
        assert_ne!(logs_tag("foo-1.2.3", &excerpt), logs_tag("bar-1.2.3", &excerpt));
    }

    #[test]
    fn test_logs_and_build_tags_differ() {
        let normalizer = LogNormalizer::new().unwrap();
        let r = record("abcdefghijklmnopqrstuvwxyz123456", &[]);
        let f = fingerprint(&r, &normalizer.normalize(&r.excerpt_lines));
        assert_ne!(f.logs_tag, f.build_tag);
        assert_eq!(f.tags(), [&f.logs_tag, &f.build_tag]);
    }

    #[test]
    fn test_tag_is_stable_across_runs() {
        // Known value: issues filed by earlier runs must stay findable.
        let expected = &hex::encode(Sha256::digest(b"nixpkgs-upkeep abc"))[..TAG_HEX_LEN];
        assert_eq!(build_tag("abc").as_str(), expected);
    }
}
