//! Canary configuration.
//!
//! Defaults target the upstream setup (builds of NixOS/nixpkgs, issues filed
//! by `samuela`). Environment variables override defaults; the CLI overrides
//! both.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Upper bound of the random pre-search delay.
///
/// Two canaries starting together land on average a third of this apart,
/// which is enough for the first one's issue to show up in search.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(15 * 60);

/// Handles that are cc'd but never auto-assigned.
pub const DONT_ASSIGN: &[&str] = &["dotlambda", "SuperSandro2000"];

/// Scope and transport of the issue search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// GitHub REST API base URL.
    pub api_base: String,
    /// Organization owning the tracker.
    pub org: String,
    /// Repository name within `org`.
    pub repo: String,
    /// Only issues opened by this account count as duplicates.
    pub author: String,
    /// Optional API token (raises the search rate limit).
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            api_base: "https://api.github.com".to_string(),
            org: "NixOS".to_string(),
            repo: "nixpkgs".to_string(),
            author: "samuela".to_string(),
            token: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl SearchConfig {
    /// Defaults with `UPKEEP_SEARCH_API`, `UPKEEP_ISSUE_AUTHOR` and
    /// `GITHUB_TOKEN` applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(api_base) = std::env::var("UPKEEP_SEARCH_API") {
            config.api_base = api_base;
        }
        if let Ok(author) = std::env::var("UPKEEP_ISSUE_AUTHOR") {
            config.author = author;
        }
        config.token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());
        config
    }

    /// Search query for `tag` restricted to this scope.
    pub fn query(&self, tag: &str) -> String {
        format!(
            "{tag} org:{org} repo:{org}/{repo} is:issue author:{author}",
            org = self.org,
            repo = self.repo,
            author = self.author,
        )
    }
}

/// Where new issues are filed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportTarget {
    /// `owner/name` of the tracker.
    pub repo: String,
    /// Label applied to every filed issue.
    pub label: String,
    /// Nix system the canary builds on, quoted in issue titles.
    pub system: String,
}

impl Default for ReportTarget {
    fn default() -> Self {
        ReportTarget {
            repo: "NixOS/nixpkgs".to_string(),
            label: "0.kind: build failure".to_string(),
            system: "x86_64-linux".to_string(),
        }
    }
}

/// Full configuration of one canary run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanaryConfig {
    /// Attribute to build.
    pub attr: String,
    /// Extra handles to cc on filed issues.
    pub cc: Vec<String>,
    /// nixpkgs checkout to build in.
    pub nixpkgs: PathBuf,
    /// Upper bound of the jitter before searching; zero disables it.
    pub max_jitter: Duration,
    pub search: SearchConfig,
    pub report: ReportTarget,
    /// Maintainers never auto-assigned.
    pub dont_assign: Vec<String>,
}

impl CanaryConfig {
    /// Configuration for building `attr` with defaults everywhere else.
    pub fn new(attr: impl Into<String>) -> Self {
        CanaryConfig {
            attr: attr.into(),
            cc: Vec::new(),
            nixpkgs: PathBuf::from("."),
            max_jitter: DEFAULT_MAX_JITTER,
            search: SearchConfig::default(),
            report: ReportTarget::default(),
            dont_assign: DONT_ASSIGN.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Like [`CanaryConfig::new`] with environment overrides
    /// (`UPKEEP_MAX_JITTER_SECS` plus those of [`SearchConfig::from_env`]).
    pub fn from_env(attr: impl Into<String>) -> Self {
        let mut config = Self::new(attr);
        config.search = SearchConfig::from_env();
        if let Some(max_jitter) = std::env::var("UPKEEP_MAX_JITTER_SECS")
            .ok()
            .and_then(|raw| parse_jitter_secs(&raw))
        {
            config.max_jitter = max_jitter;
        }
        config
    }

    pub fn with_nixpkgs(mut self, path: impl Into<PathBuf>) -> Self {
        self.nixpkgs = path.into();
        self
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }
}

/// Parse an `UPKEEP_MAX_JITTER_SECS` value; invalid values keep the default.
fn parse_jitter_secs(raw: &str) -> Option<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            warn!(
                value = raw,
                error = %e,
                default_secs = DEFAULT_MAX_JITTER.as_secs(),
                "ignoring invalid UPKEEP_MAX_JITTER_SECS"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CanaryConfig::new("hello");
        assert_eq!(config.attr, "hello");
        assert_eq!(config.nixpkgs, PathBuf::from("."));
        assert_eq!(config.max_jitter, Duration::from_secs(900));
        assert_eq!(config.report.repo, "NixOS/nixpkgs");
        assert_eq!(config.dont_assign, vec!["dotlambda", "SuperSandro2000"]);
    }

    #[test]
    fn test_query_scope() {
        let search = SearchConfig::default();
        assert_eq!(
            search.query("0123abcd"),
            "0123abcd org:NixOS repo:NixOS/nixpkgs is:issue author:samuela"
        );
    }

    #[test]
    fn test_builders() {
        let config = CanaryConfig::new("jax")
            .with_nixpkgs("/src/nixpkgs")
            .with_cc(vec!["alice".to_string()])
            .with_max_jitter(Duration::ZERO);
        assert_eq!(config.nixpkgs, PathBuf::from("/src/nixpkgs"));
        assert_eq!(config.cc, vec!["alice"]);
        assert!(config.max_jitter.is_zero());
    }

    #[test]
    fn test_parse_jitter_secs() {
        assert_eq!(parse_jitter_secs("0"), Some(Duration::ZERO));
        assert_eq!(parse_jitter_secs(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_jitter_secs("15m"), None);
        assert_eq!(parse_jitter_secs("-1"), None);
    }

    #[test]
    fn test_token_not_serialized() {
        let search = SearchConfig {
            token: Some("secret".to_string()),
            ..SearchConfig::default()
        };
        let json = serde_json::to_string(&search).unwrap();
        assert!(!json.contains("secret"));
    }
}
