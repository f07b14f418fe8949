//! In-memory fakes for the pipeline's external seams (testing only)
//!
//! Provides `StaticIssueSearch`, `RecordingReporter` and `StaticContext`,
//! which satisfy the trait contracts without network access, `gh` or Nix.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::dedup::IssueSearch;
use crate::error::{CanaryError, Result};
use crate::report::{FailureReport, ReportContext, ReportContextProvider, Reporter};

// ---------------------------------------------------------------------------
// StaticIssueSearch
// ---------------------------------------------------------------------------

/// Issue search answering from a fixed `tag -> match count` table.
///
/// The tag is the first whitespace-separated term of the query.
#[derive(Debug, Default)]
pub struct StaticIssueSearch {
    matches: HashMap<String, u64>,
    failure: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticIssueSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A search that fails every query with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Report `count` existing issues for `tag`.
    pub fn with_matches(mut self, tag: &str, count: u64) -> Self {
        self.matches.insert(tag.to_string(), count);
        self
    }

    /// Queries received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueSearch for StaticIssueSearch {
    async fn count_matches(&self, query: &str) -> Result<u64> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(message) = &self.failure {
            return Err(CanaryError::Search(message.clone()));
        }
        let tag = query.split_whitespace().next().unwrap_or_default();
        Ok(self.matches.get(tag).copied().unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that stores every report instead of filing it.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<FailureReport>>,
    fail: bool,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reporter whose submissions always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(&self, report: &FailureReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        if self.fail {
            return Err(CanaryError::Report("submission rejected".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticContext
// ---------------------------------------------------------------------------

/// Context provider returning a fixed [`ReportContext`].
#[derive(Debug, Default)]
pub struct StaticContext {
    context: ReportContext,
    requests: Mutex<Vec<(String, String)>>,
}

impl StaticContext {
    pub fn new(context: ReportContext) -> Self {
        Self {
            context,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `(attr, failing_attr)` pairs requested so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportContextProvider for StaticContext {
    async fn gather(&self, attr: &str, failing_attr: &str) -> Result<ReportContext> {
        self.requests
            .lock()
            .unwrap()
            .push((attr.to_string(), failing_attr.to_string()));
        Ok(self.context.clone())
    }
}
