//! Normalization of build-log excerpts into a stable fingerprint basis.
//!
//! The excerpt Nix prints for a failing builder is full of values that change
//! between otherwise identical failures: test timings, store-path hashes,
//! Bazel progress counters, version numbers. Each [`NormalizationPass`]
//! deletes one family of such values. Passes run in a fixed order because
//! some patterns overlap on digit runs.

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::{CanaryError, Result};

/// A single rewrite applied to the joined excerpt.
#[derive(Debug, Clone)]
pub struct NormalizationPass {
    /// Stable identifier for logs.
    pub name: &'static str,
    /// What the pass removes and why.
    pub rationale: &'static str,
    pattern: Regex,
}

impl NormalizationPass {
    fn compile(name: &'static str, pattern: &str, rationale: &'static str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|source| CanaryError::Pattern { name, source })?;
        Ok(Self {
            name,
            rationale,
            pattern,
        })
    }

    /// Source of the compiled pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    fn apply(&self, text: &str) -> String {
        self.pattern.replace_all(text, "").into_owned()
    }
}

/// The ordered pass table: `(name, pattern, rationale)`.
///
/// Timing passes come first so that a run such as `1.2.3s` is consumed as a
/// duration before the semver pass sees it. Store paths are removed before
/// the Bazel and semver passes because the hash part may contain digits.
pub const PASSES: &[(&str, &str, &str)] = &[
    (
        "decimal-seconds",
        r"\d+.\d+s",
        "pytest summaries end in `in 604.22s`",
    ),
    (
        "clock-duration",
        r"\d+:\d+:\d+",
        "pytest and others print `(0:10:04)` wall-clock durations",
    ),
    (
        "minutes",
        r"\d+ minutes",
        "stdenv phases report `completed in 2 minutes 22 seconds`",
    ),
    (
        "seconds",
        r"\d+ seconds",
        "stdenv phases report `completed in 2 minutes 22 seconds`",
    ),
    (
        "store-path",
        r"/nix/store/\w{32}",
        "store hashes change with every input change",
    ),
    (
        "bazel-progress",
        r"> \[[,\d+]* / [,\d+]*\] .*",
        "Bazel prints non-deterministic `[1,234 / 5,678]` action counters",
    ),
    (
        "bazel-info",
        r"> INFO:.*",
        "Bazel INFO lines are intermediate chatter",
    ),
    (
        "semver",
        r"\d+\.\d+\.\d+",
        "version bumps of the package or its dependencies must not split identities",
    ),
];

/// Excerpt text after every pass has been applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NormalizedExcerpt(String);

impl NormalizedExcerpt {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NormalizedExcerpt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Applies [`PASSES`] in order.
#[derive(Debug, Clone)]
pub struct LogNormalizer {
    passes: Vec<NormalizationPass>,
}

impl LogNormalizer {
    /// Compile the pass table.
    pub fn new() -> Result<Self> {
        let passes = PASSES
            .iter()
            .map(|(name, pattern, rationale)| NormalizationPass::compile(name, pattern, rationale))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { passes })
    }

    /// The compiled passes, in application order.
    pub fn passes(&self) -> &[NormalizationPass] {
        &self.passes
    }

    /// Join `lines` with `\n` and normalize the result.
    pub fn normalize<S: AsRef<str>>(&self, lines: &[S]) -> NormalizedExcerpt {
        let joined = lines
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        self.normalize_text(&joined)
    }

    /// Normalize already-joined excerpt text.
    pub fn normalize_text(&self, text: &str) -> NormalizedExcerpt {
        let mut current = text.to_string();
        for pass in &self.passes {
            let next = pass.apply(&current);
            if next.len() != current.len() {
                debug!(
                    pass = pass.name,
                    removed = current.len() - next.len(),
                    "normalization pass matched"
                );
            }
            current = next;
        }
        NormalizedExcerpt(current)
    }
}
