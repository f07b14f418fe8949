//! Duplicate-report gate.
//!
//! Before filing, the canary searches the tracker for issues carrying either
//! of the failure's tags. Independent canary jobs that hit the same failure
//! at the same time would all see an empty search and all file, so the gate
//! first sleeps a random delay (see [`DedupGate::wait_jitter`]). Nothing
//! shared can be locked here: the tracker's search index is the only shared
//! state and it is eventually consistent. The jitter reduces duplicate
//! reports, it does not rule them out.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::error::{CanaryError, Result};
use crate::fingerprint::DedupTag;

/// Issue search backend.
#[async_trait]
pub trait IssueSearch: Send + Sync {
    /// Total number of issues matching `query`.
    async fn count_matches(&self, query: &str) -> Result<u64>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
}

/// [`IssueSearch`] over the GitHub REST `search/issues` endpoint.
pub struct GitHubIssueSearch {
    config: SearchConfig,
    http_client: reqwest::Client,
}

impl GitHubIssueSearch {
    /// Create a client for `config.api_base`.
    pub fn new(config: SearchConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("nixpkgs-upkeep/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;

        Ok(GitHubIssueSearch {
            config,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/search/issues", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl IssueSearch for GitHubIssueSearch {
    async fn count_matches(&self, query: &str) -> Result<u64> {
        let mut request = self
            .http_client
            .get(self.endpoint())
            .header(ACCEPT, "application/vnd.github.v3+json")
            .query(&[("q", query)]);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CanaryError::SearchStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body: SearchResponse = response.json().await?;
        debug!(query, total_count = body.total_count, "issue search");
        Ok(body.total_count)
    }
}

/// Result of checking one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    /// At least one existing issue carries the tag.
    AlreadyReported { matches: u64 },
    /// No issue carries the tag yet.
    Clear,
}

/// Jittered search gate in front of the reporter.
pub struct DedupGate<S> {
    search: S,
    scope: SearchConfig,
    max_jitter: Duration,
}

impl<S: IssueSearch> DedupGate<S> {
    pub fn new(search: S, scope: SearchConfig, max_jitter: Duration) -> Self {
        Self {
            search,
            scope,
            max_jitter,
        }
    }

    /// Upper bound of the pre-search delay.
    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    pub fn search(&self) -> &S {
        &self.search
    }

    /// Uniformly random delay in `[0, max_jitter]`, millisecond resolution.
    pub fn jitter_delay(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis().min(u64::MAX as u128) as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    /// Sleep for [`DedupGate::jitter_delay`]. Returns the delay slept.
    pub async fn wait_jitter(&self) -> Duration {
        let delay = self.jitter_delay();
        info!(
            delay_secs = delay.as_secs(),
            max_secs = self.max_jitter.as_secs(),
            "Patience is a virtue, especially when dealing with concurrent processes..."
        );
        tokio::time::sleep(delay).await;
        delay
    }

    /// Search for issues already carrying `tag`.
    pub async fn check(&self, tag: &DedupTag) -> Result<DedupVerdict> {
        let query = self.scope.query(tag.as_str());
        let matches = self.search.count_matches(&query).await?;
        if matches > 0 {
            info!(%tag, matches, "existing issue(s) found");
            Ok(DedupVerdict::AlreadyReported { matches })
        } else {
            debug!(%tag, "no existing issue");
            Ok(DedupVerdict::Clear)
        }
    }
}
