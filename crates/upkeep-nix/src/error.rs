//! Error types for upkeep-nix

use thiserror::Error;

/// Errors that can occur while querying a nixpkgs checkout
#[derive(Error, Debug)]
pub enum NixError {
    /// A helper command could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Nix command execution failed
    #[error("Nix command failed: {0}")]
    NixCommandFailed(String),

    /// Git command execution failed
    #[error("git command failed: {0}")]
    GitCommandFailed(String),

    /// Git returned no commit
    #[error("git returned an empty commit hash for {0}")]
    EmptyCommit(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
