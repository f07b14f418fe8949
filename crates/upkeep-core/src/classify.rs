//! Failure classification for captured `nix-build` output.
//!
//! Decides whether a finished build is worth reporting and, if so, pulls the
//! failing derivation out of the error stream. The grammar is the exact
//! failure line printed by Nix when a builder exits non-zero:
//!
//! ```text
//! error: builder for '/nix/store/<32-char hash>-<pname>-<version>.drv' failed with exit code 1;
//!        last 10 log lines:
//!        > ...
//! ```
//!
//! A build is classified only when exactly one such line is present. Anything
//! else (no line, or several failing builders) is left unclassified and the
//! original exit code is propagated instead of guessing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CanaryError, Result};
use crate::process::ProcessResult;

/// Failure-marker grammar. Update when Nix changes its error format.
pub const BUILDER_FAILURE_PATTERN: &str =
    r"^error: builder for '/nix/store/(\w{32})-(.*)\.drv' failed with exit code \d+;";

/// Lines between the marker and the first excerpt line (the "last N log
/// lines:" header).
pub const EXCERPT_OFFSET: usize = 2;

/// Number of log lines Nix prints after the header.
pub const EXCERPT_LEN: usize = 10;

const NO_SPACE_PHRASE: &str = "no space left on device";
const KILLED_MARKER: &str = "Killed";

/// Environmental conditions that make a failure not worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentalCause {
    /// The builder ran out of disk.
    NoSpaceLeft,
    /// The builder was killed, usually by the OOM killer.
    Killed,
}

impl std::fmt::Display for EnvironmentalCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentalCause::NoSpaceLeft => write!(f, "No space left on device"),
            EnvironmentalCause::Killed => write!(f, "Killed"),
        }
    }
}

/// The failing derivation extracted from a build's error stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// 32-character store hash of the failing `.drv`.
    pub build_identifier: String,

    /// `<pname>-<version>` part of the derivation name.
    pub package_name_version: String,

    /// Up to [`EXCERPT_LEN`] log lines following the marker's header line.
    pub excerpt_lines: Vec<String>,

    /// Index of the marker line within the error stream.
    pub marker_index: usize,

    /// Error output from the marker line to the end of the stream, trimmed.
    pub failure_log: String,
}

/// Outcome of classifying a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The build succeeded.
    Success,

    /// The build failed for environmental reasons.
    NotReportable(EnvironmentalCause),

    /// Failed, but not in the one-failing-builder shape; carries the child's exit code.
    Unclassifiable { exit_code: i32 },

    /// Failed with exactly one failing builder.
    Classified(FailureRecord),
}

/// Classifier holding the compiled failure grammar.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    marker: Regex,
}

impl FailureClassifier {
    /// Compile the classifier with [`BUILDER_FAILURE_PATTERN`].
    pub fn new() -> Result<Self> {
        let marker =
            Regex::new(BUILDER_FAILURE_PATTERN).map_err(|source| CanaryError::Pattern {
                name: "builder-failure",
                source,
            })?;
        Ok(Self { marker })
    }

    /// Classify a finished build.
    pub fn classify(&self, result: &ProcessResult) -> Classification {
        if result.success() {
            info!("Build succeeded");
            return Classification::Success;
        }

        let lines = result.stderr_text();
        let classification = self.classify_lines(result.exit_code, &lines);
        match &classification {
            Classification::NotReportable(cause) => {
                info!(%cause, "Failed due to environmental condition, not reporting");
            }
            Classification::Unclassifiable { exit_code } => {
                info!(exit_code, "Failed to find a unique error line");
            }
            Classification::Classified(record) => {
                info!(
                    package = %record.package_name_version,
                    drv = %record.build_identifier,
                    "Found failing builder"
                );
            }
            Classification::Success => {}
        }
        classification
    }

    /// Classify decoded stderr lines of a build that exited with `exit_code`.
    pub fn classify_lines(&self, exit_code: i32, lines: &[String]) -> Classification {
        if exit_code == 0 {
            return Classification::Success;
        }

        if let Some(cause) = environmental_cause(lines) {
            return Classification::NotReportable(cause);
        }

        let markers: Vec<(usize, regex::Captures<'_>)> = lines
            .iter()
            .enumerate()
            .filter_map(|(ix, line)| self.marker.captures(line).map(|caps| (ix, caps)))
            .collect();

        debug!(count = markers.len(), "failure marker lines");
        let [(marker_index, caps)] = markers.as_slice() else {
            return Classification::Unclassifiable { exit_code };
        };
        let marker_index = *marker_index;

        let start = (marker_index + EXCERPT_OFFSET).min(lines.len());
        let end = (start + EXCERPT_LEN).min(lines.len());

        Classification::Classified(FailureRecord {
            build_identifier: caps[1].to_string(),
            package_name_version: caps[2].to_string(),
            excerpt_lines: lines[start..end].to_vec(),
            marker_index,
            failure_log: lines[marker_index..].join("\n").trim().to_string(),
        })
    }
}

/// Detect failures caused by the build machine rather than the package.
pub fn environmental_cause(lines: &[String]) -> Option<EnvironmentalCause> {
    let text = lines.join("\n");
    if text.to_lowercase().contains(NO_SPACE_PHRASE) {
        Some(EnvironmentalCause::NoSpaceLeft)
    } else if text.contains(KILLED_MARKER) {
        Some(EnvironmentalCause::Killed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(hash: &str, name: &str) -> String {
        format!("error: builder for '/nix/store/{hash}-{name}.drv' failed with exit code 1;")
    }

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    const HASH: &str = "abcdefghijklmnopqrstuvwxyz123456";

    #[test]
    fn test_success_short_circuits() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = vec![marker(HASH, "foo-1.0")];
        assert_eq!(
            classifier.classify_lines(0, &stderr),
            Classification::Success
        );
    }

    #[test]
    fn test_no_space_is_case_insensitive() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = lines(&["write failed: NO SPACE LEFT ON DEVICE"]);
        assert_eq!(
            classifier.classify_lines(1, &stderr),
            Classification::NotReportable(EnvironmentalCause::NoSpaceLeft)
        );
    }

    #[test]
    fn test_killed_is_case_sensitive() {
        let classifier = FailureClassifier::new().unwrap();
        let killed = lines(&["/bin/sh: line 1:  1234 Killed  make"]);
        assert_eq!(
            classifier.classify_lines(137, &killed),
            Classification::NotReportable(EnvironmentalCause::Killed)
        );

        let lowercase = lines(&["process was killed by user"]);
        assert_eq!(
            classifier.classify_lines(1, &lowercase),
            Classification::Unclassifiable { exit_code: 1 }
        );
    }

    #[test]
    fn test_environmental_wins_over_marker() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = vec![marker(HASH, "foo-1.0"), "No space left on device".to_string()];
        assert!(matches!(
            classifier.classify_lines(1, &stderr),
            Classification::NotReportable(EnvironmentalCause::NoSpaceLeft)
        ));
    }

    #[test]
    fn test_no_marker_is_unclassifiable() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = lines(&["error: tensorflow-gpu-2.13.0 not supported for interpreter python3.12"]);
        assert_eq!(
            classifier.classify_lines(1, &stderr),
            Classification::Unclassifiable { exit_code: 1 }
        );
    }

    #[test]
    fn test_two_markers_are_unclassifiable() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = vec![
            marker(HASH, "foo-1.0"),
            "last 10 log lines:".to_string(),
            marker("0123456789abcdefghijklmnopqrstuv", "bar-2.0"),
        ];
        assert_eq!(
            classifier.classify_lines(100, &stderr),
            Classification::Unclassifiable { exit_code: 100 }
        );
    }

    #[test]
    fn test_marker_must_start_the_line() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = vec![format!("  {}", marker(HASH, "foo-1.0"))];
        assert!(matches!(
            classifier.classify_lines(1, &stderr),
            Classification::Unclassifiable { .. }
        ));
    }

    #[test]
    fn test_short_hash_does_not_match() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = vec![marker("abc123", "foo-1.0")];
        assert!(matches!(
            classifier.classify_lines(1, &stderr),
            Classification::Unclassifiable { .. }
        ));
    }

    #[test]
    fn test_classified_record() {
        let classifier = FailureClassifier::new().unwrap();
        let mut stderr = lines(&["building '/nix/store/xyz-foo.drv'..."]);
        stderr.push(marker(HASH, "python3.12-foo-1.2.3"));
        stderr.push("       last 10 log lines:".to_string());
        for i in 0..12 {
            stderr.push(format!("       > line {i}"));
        }

        let Classification::Classified(record) = classifier.classify_lines(1, &stderr) else {
            panic!("expected classified failure");
        };
        assert_eq!(record.build_identifier, HASH);
        assert_eq!(record.package_name_version, "python3.12-foo-1.2.3");
        assert_eq!(record.marker_index, 1);
        assert_eq!(record.excerpt_lines.len(), EXCERPT_LEN);
        assert_eq!(record.excerpt_lines[0], "       > line 0");
        assert_eq!(record.excerpt_lines[9], "       > line 9");
        assert!(record.failure_log.starts_with("error: builder for"));
        assert!(record.failure_log.ends_with("> line 11"));
    }

    #[test]
    fn test_excerpt_clamps_at_end_of_stream() {
        let classifier = FailureClassifier::new().unwrap();
        let stderr = vec![
            marker(HASH, "foo-1.0"),
            "last 10 log lines:".to_string(),
            "only line".to_string(),
        ];
        let Classification::Classified(record) = classifier.classify_lines(1, &stderr) else {
            panic!("expected classified failure");
        };
        assert_eq!(record.excerpt_lines, vec!["only line".to_string()]);

        let Classification::Classified(record) =
            classifier.classify_lines(1, &[marker(HASH, "foo-1.0")])
        else {
            panic!("expected classified failure");
        };
        assert!(record.excerpt_lines.is_empty());
    }

    #[test]
    fn test_classify_decodes_process_result() {
        let classifier = FailureClassifier::new().unwrap();
        let result = ProcessResult {
            exit_code: 1,
            stdout_lines: vec![],
            stderr_lines: vec![
                format!("{}\n", marker(HASH, "foo-1.0")).into_bytes(),
                b"last 10 log lines:\n".to_vec(),
                b"> boom\n".to_vec(),
            ],
        };
        let Classification::Classified(record) = classifier.classify(&result) else {
            panic!("expected classified failure");
        };
        assert_eq!(record.excerpt_lines, vec!["> boom".to_string()]);
    }
}
