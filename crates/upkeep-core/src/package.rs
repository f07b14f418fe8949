//! Package identity helpers.
//!
//! Nix derivation names are `<pname>-<version>`. The split takes the last
//! `-`-separated segment as the version, which is wrong for versionless names
//! whose pname itself contains a hyphen (`bazel-build-jaxlib` splits into
//! `bazel-build` / `jaxlib`). The heuristic is kept as-is so that it agrees
//! with the failure grammar's capture; callers must not rely on it for
//! anything but display and attribute lookup.

use serde::{Deserialize, Serialize};

/// `(name, version)` split of a derivation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub version: String,
}

/// Split `pname-version` on its last hyphen.
///
/// A name without any hyphen yields an empty `name` and the whole input as
/// `version`.
pub fn split_pname_version(pname_version: &str) -> PackageIdentity {
    match pname_version.rsplit_once('-') {
        Some((name, version)) => PackageIdentity {
            name: name.to_string(),
            version: version.to_string(),
        },
        None => PackageIdentity {
            name: String::new(),
            version: pname_version.to_string(),
        },
    }
}

/// Python interpreter prefixes of Python package pnames and their package sets.
const PYTHON_PREFIXES: &[(&str, &str)] = &[
    ("python3.9-", "python39Packages"),
    ("python3.10-", "python310Packages"),
    ("python3.11-", "python311Packages"),
    ("python3.12-", "python312Packages"),
];

/// Map a failing pname back to the attribute that builds it.
pub fn pname_to_attr(pname: &str) -> String {
    for (prefix, set) in PYTHON_PREFIXES {
        if let Some(rest) = pname.strip_prefix(prefix) {
            return format!("{set}.{rest}");
        }
    }

    // jaxlib builds through an internal Bazel derivation.
    if pname == "bazel-build-jaxlib" {
        return "python3Packages.jaxlib".to_string();
    }

    pname.to_string()
}
