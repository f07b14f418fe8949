//! Error taxonomy for the canary pipeline.
//!
//! Only conditions that abort the pipeline live here. Environmental build
//! failures and unclassifiable error output are ordinary
//! [`Classification`](crate::classify::Classification) results, not errors.

/// Fatal pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum CanaryError {
    #[error("command must not be empty")]
    EmptyCommand,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stream} pipe was not captured")]
    PipeUnavailable { stream: &'static str },

    #[error("failed to capture child output: {0}")]
    Capture(#[source] std::io::Error),

    #[error("invalid pattern {name}: {source}")]
    Pattern {
        name: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("issue search failed: {0}")]
    Search(String),

    #[error("issue search returned status {status}: {body}")]
    SearchStatus { status: u16, body: String },

    #[error("report submission failed: {0}")]
    Report(String),

    #[error("nixpkgs query failed: {0}")]
    Nix(#[from] upkeep_nix::NixError),
}

impl From<reqwest::Error> for CanaryError {
    fn from(err: reqwest::Error) -> Self {
        CanaryError::Search(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, CanaryError>;
