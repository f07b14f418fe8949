//! Queries against a local nixpkgs checkout
//!
//! Wraps the handful of `nix`/`git` invocations used to enrich a failure
//! report. Maintainer and environment lookups never fail the canary: a broken
//! `meta.maintainers` must not stop a build failure from being filed.

use crate::error::NixError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

/// One entry of a package's `meta.maintainers` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    /// GitHub handle, used for cc and assignment
    pub github: Option<String>,
    /// Display name
    pub name: Option<String>,
}

/// Parse the JSON produced by `nix eval --json <attr>.meta.maintainers`
/// into the list of GitHub handles, preserving order.
///
/// Maintainers without a `github` field are skipped.
pub fn parse_maintainers(json: &[u8]) -> Result<Vec<String>> {
    let maintainers: Vec<Maintainer> = serde_json::from_slice(json)?;
    Ok(maintainers.into_iter().filter_map(|m| m.github).collect())
}

/// A nixpkgs working tree the canary builds from
#[derive(Debug, Clone)]
pub struct NixpkgsCheckout {
    path: PathBuf,
}

impl NixpkgsCheckout {
    /// Create a handle for the checkout at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        NixpkgsCheckout { path: path.into() }
    }

    /// Root of the checkout
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// GitHub handles of the maintainers of `attr`.
    ///
    /// Returns an empty list (and logs) when evaluation fails.
    pub async fn maintainers(&self, attr: &str) -> Vec<String> {
        match self.try_maintainers(attr).await {
            Ok(handles) => {
                debug!(attr, count = handles.len(), "resolved maintainers");
                handles
            }
            Err(e) => {
                warn!(attr, error = %e, "Failed to get maintainers");
                Vec::new()
            }
        }
    }

    async fn try_maintainers(&self, attr: &str) -> Result<Vec<String>> {
        let selector = format!("{attr}.meta.maintainers");
        let output = Command::new("nix")
            .arg("eval")
            .arg("--json")
            .arg("--file")
            .arg(&self.path)
            .arg(&selector)
            .output()
            .await
            .map_err(|source| NixError::Spawn {
                program: "nix".to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NixError::NixCommandFailed(stderr.trim().to_string()));
        }

        parse_maintainers(&output.stdout)
    }

    /// Full hash of the checked-out commit (`git log -1 --pretty=format:%H`)
    pub async fn head_commit(&self) -> Result<String> {
        let output = Command::new("git")
            .args(["log", "-1", "--pretty=format:%H"])
            .current_dir(&self.path)
            .output()
            .await
            .map_err(|source| NixError::Spawn {
                program: "git".to_string(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NixError::GitCommandFailed(stderr.trim().to_string()));
        }

        let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if commit.is_empty() {
            return Err(NixError::EmptyCommit(self.path.display().to_string()));
        }
        Ok(commit)
    }

    /// Output of `nix-info -m`, or an empty string if it cannot be produced
    pub async fn nix_info(&self) -> String {
        let output = Command::new("nix-shell")
            .args(["-p", "nix-info", "--run", "nix-info -m"])
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim().to_string()
            }
            Ok(out) => {
                warn!(code = out.status.code(), "nix-info exited unsuccessfully");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "failed to run nix-info");
                String::new()
            }
        }
    }

    /// Contents of `~/.config/nixpkgs/config.nix`, empty when missing
    pub fn user_config(&self) -> String {
        match std::env::var_os("HOME") {
            Some(home) => read_user_config(Path::new(&home)),
            None => {
                warn!("HOME is not set, skipping nixpkgs config");
                String::new()
            }
        }
    }
}

fn read_user_config(home: &Path) -> String {
    let path = home.join(".config").join("nixpkgs").join("config.nix");
    match std::fs::read_to_string(&path) {
        Ok(content) => content.trim().to_string(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read nixpkgs config");
            String::new()
        }
    }
}
