//! upkeep-nix: nixpkgs checkout helpers for the build canary
//!
//! Everything the issue reporter needs to know about the checkout the
//! canary built from: package maintainers, the checked-out commit,
//! `nix-info` output and the user's nixpkgs config.
//!
//! All queries shell out to `nix`, `nix-shell` or `git`. Only the commit
//! lookup is fatal; the rest degrade to empty values and log a warning.

pub mod checkout;
pub mod error;

pub use checkout::{parse_maintainers, Maintainer, NixpkgsCheckout};
pub use error::NixError;

/// Result type for nixpkgs checkout queries
pub type Result<T> = std::result::Result<T, NixError>;

/// Check if Nix is available on the system
pub fn is_nix_available() -> bool {
    std::process::Command::new("nix")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
