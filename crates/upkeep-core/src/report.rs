//! Issue reporting for classified, not-yet-reported failures.
//!
//! [`IssueDraft::from_report`] renders the issue; a [`Reporter`] submits it.
//! The production reporter shells out to `gh issue create`, which carries the
//! credentials of the CI job. Submission failure is fatal: filing the issue is
//! the last thing the canary does.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;
use upkeep_nix::NixpkgsCheckout;

use crate::classify::FailureRecord;
use crate::config::ReportTarget;
use crate::error::{CanaryError, Result};
use crate::fingerprint::Fingerprint;

/// Link to the CI run that produced the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub url: String,
}

impl WorkflowRun {
    /// Build the run URL from `GITHUB_REPOSITORY` and `GITHUB_RUN_ID`.
    pub fn from_env() -> Self {
        Self::from_parts(
            std::env::var("GITHUB_REPOSITORY").ok(),
            std::env::var("GITHUB_RUN_ID").ok(),
        )
    }

    /// Missing parts are rendered as `<GITHUB_REPOSITORY>` / `<GITHUB_RUN_ID>`
    /// placeholders so local runs still produce a readable body.
    pub fn from_parts(repository: Option<String>, run_id: Option<String>) -> Self {
        let repository = repository.unwrap_or_else(|| "<GITHUB_REPOSITORY>".to_string());
        let run_id = run_id.unwrap_or_else(|| "<GITHUB_RUN_ID>".to_string());
        WorkflowRun {
            url: format!("https://github.com/{repository}/actions/runs/{run_id}"),
        }
    }
}

/// Facts about the checkout gathered right before filing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportContext {
    /// Checked-out nixpkgs commit.
    pub commit: String,
    /// Maintainers of the attribute the canary was asked to build.
    pub attr_maintainers: Vec<String>,
    /// Maintainers of the attribute that actually failed.
    pub failing_attr_maintainers: Vec<String>,
    /// `nix-info -m` output.
    pub nix_info: String,
    /// `~/.config/nixpkgs/config.nix`.
    pub nixpkgs_config: String,
}

/// Source of [`ReportContext`].
#[async_trait]
pub trait ReportContextProvider: Send + Sync {
    async fn gather(&self, attr: &str, failing_attr: &str) -> Result<ReportContext>;
}

#[async_trait]
impl ReportContextProvider for NixpkgsCheckout {
    async fn gather(&self, attr: &str, failing_attr: &str) -> Result<ReportContext> {
        let commit = self.head_commit().await?;
        let attr_maintainers = self.maintainers(attr).await;
        let failing_attr_maintainers = self.maintainers(failing_attr).await;
        Ok(ReportContext {
            commit,
            attr_maintainers,
            failing_attr_maintainers,
            nix_info: self.nix_info().await,
            nixpkgs_config: self.user_config(),
        })
    }
}

/// Everything known about a failure that is about to be filed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Attribute the canary was asked to build.
    pub attr: String,
    /// Attribute of the failing dependency (may equal `attr`).
    pub failing_attr: String,
    pub record: FailureRecord,
    pub fingerprint: Fingerprint,
    pub context: ReportContext,
    /// Extra handles to cc.
    pub cc: Vec<String>,
    /// Handles never assigned.
    pub dont_assign: Vec<String>,
    pub workflow: WorkflowRun,
}

/// A rendered issue ready for submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDraft {
    pub title: String,
    pub body: String,
    pub label: String,
    pub assignees: Vec<String>,
}

fn mentions(handles: &[String]) -> String {
    handles
        .iter()
        .map(|h| format!("@{h}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl IssueDraft {
    /// Render `report` for filing under `target`.
    pub fn from_report(report: &FailureReport, target: &ReportTarget) -> Self {
        let commit = &report.context.commit;
        let short_commit: String = commit.chars().take(8).collect();
        let title = format!(
            "`{}` build failure on {} as of `{}`",
            report.failing_attr, target.system, short_commit
        );

        let assignees = report
            .context
            .failing_attr_maintainers
            .iter()
            .filter(|m| !report.dont_assign.contains(*m))
            .cloned()
            .collect();

        IssueDraft {
            title,
            body: Self::render_body(report, target),
            label: target.label.clone(),
            assignees,
        }
    }

    fn render_body(report: &FailureReport, target: &ReportTarget) -> String {
        let ctx = &report.context;
        let url = &report.workflow.url;
        let other_cc = if report.cc.is_empty() {
            "n/a".to_string()
        } else {
            mentions(&report.cc)
        };

        let mut md = String::from("\n## Issue description\n");
        md.push_str(&format!(
            "Build of `{}` failed on {} as of {}. This is currently breaking `{}`.\n\n",
            report.failing_attr, target.system, ctx.commit, report.attr
        ));
        md.push_str(&format!("```\n{}\n```\n\n", report.record.failure_log));
        md.push_str(&format!("[full build log]({url})\n\n"));
        md.push_str(&format!(
            "{} maintainers cc: {}\n",
            report.attr,
            mentions(&ctx.attr_maintainers)
        ));
        md.push_str(&format!(
            "{} maintainers cc: {}\n",
            report.failing_attr,
            mentions(&ctx.failing_attr_maintainers)
        ));
        md.push_str(&format!("Other cc: {other_cc}\n\n"));

        md.push_str("### Steps to reproduce\n");
        md.push_str(&format!("1. Checkout nixpkgs at commit {}\n", ctx.commit));
        md.push_str(&format!("2. Run `nix-build -A {}`\n\n", report.failing_attr));

        md.push_str("## Technical details\n");
        md.push_str(&format!("```\n {}\n```\n\n", ctx.nix_info));
        md.push_str("Contents of `~/.config/nixpkgs/config.nix`:\n");
        md.push_str(&format!("```\n{}\n```\n\n", ctx.nixpkgs_config));

        md.push_str("## Misc.\n");
        md.push_str(
            "This issue was automatically generated by \
             [nixpkgs-upkeep](https://github.com/samuela/nixpkgs-upkeep).\n",
        );
        md.push_str(&format!("- [CI workflow]({url}) that created this issue.\n"));
        md.push_str(&format!(
            "- Internal tags: {} {}\n",
            report.fingerprint.logs_tag, report.fingerprint.build_tag
        ));
        md
    }

    /// Arguments for `gh`, starting with `issue create`.
    pub fn gh_args(&self, repo: &str) -> Vec<String> {
        let mut args = vec![
            "issue".to_string(),
            "create".to_string(),
            "--repo".to_string(),
            repo.to_string(),
            "--label".to_string(),
            self.label.clone(),
        ];
        if !self.assignees.is_empty() {
            args.push("--assignee".to_string());
            args.push(self.assignees.join(","));
        }
        args.extend([
            "--title".to_string(),
            self.title.clone(),
            "--body".to_string(),
            self.body.clone(),
        ]);
        args
    }
}

/// Files a report for a new failure.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, report: &FailureReport) -> Result<()>;
}

/// [`Reporter`] using the GitHub CLI.
pub struct GhCliReporter {
    target: ReportTarget,
    program: String,
}

impl GhCliReporter {
    pub fn new(target: ReportTarget) -> Self {
        Self {
            target,
            program: "gh".to_string(),
        }
    }

    /// Use a different `gh` executable.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Reporter for GhCliReporter {
    async fn report(&self, report: &FailureReport) -> Result<()> {
        let draft = IssueDraft::from_report(report, &self.target);
        info!(title = %draft.title, repo = %self.target.repo, "Creating issue");

        let status = Command::new(&self.program)
            .args(draft.gh_args(&self.target.repo))
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|source| CanaryError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(CanaryError::Report(format!(
                "{} issue create exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{build_tag, DedupTag};

    fn sample_report() -> FailureReport {
        FailureReport {
            attr: "python3Packages.jax".to_string(),
            failing_attr: "python312Packages.jaxlib".to_string(),
            record: FailureRecord {
                build_identifier: "abcdefghijklmnopqrstuvwxyz123456".to_string(),
                package_name_version: "python3.12-jaxlib-0.4.28".to_string(),
                excerpt_lines: vec!["> boom".to_string()],
                marker_index: 0,
                failure_log: "error: builder for ... failed\n> boom".to_string(),
            },
            fingerprint: Fingerprint {
                logs_tag: DedupTag::from_input("logs"),
                build_tag: build_tag("abcdefghijklmnopqrstuvwxyz123456"),
            },
            context: ReportContext {
                commit: "0123456789abcdef0123456789abcdef01234567".to_string(),
                attr_maintainers: vec!["alice".to_string()],
                failing_attr_maintainers: vec!["bob".to_string(), "dotlambda".to_string()],
                nix_info: " - system: `\"x86_64-linux\"`".to_string(),
                nixpkgs_config: "{ allowUnfree = true; }".to_string(),
            },
            cc: vec![],
            dont_assign: vec!["dotlambda".to_string(), "SuperSandro2000".to_string()],
            workflow: WorkflowRun::from_parts(
                Some("samuela/nixpkgs-upkeep".to_string()),
                Some("42".to_string()),
            ),
        }
    }

    #[test]
    fn test_workflow_url() {
        let run = WorkflowRun::from_parts(Some("o/r".to_string()), Some("7".to_string()));
        assert_eq!(run.url, "https://github.com/o/r/actions/runs/7");
    }

    #[test]
    fn test_workflow_url_placeholders() {
        let run = WorkflowRun::from_parts(None, None);
        assert_eq!(
            run.url,
            "https://github.com/<GITHUB_REPOSITORY>/actions/runs/<GITHUB_RUN_ID>"
        );
    }

    #[test]
    fn test_title_uses_short_commit() {
        let draft = IssueDraft::from_report(&sample_report(), &ReportTarget::default());
        assert_eq!(
            draft.title,
            "`python312Packages.jaxlib` build failure on x86_64-linux as of `01234567`"
        );
        assert_eq!(draft.label, "0.kind: build failure");
    }

    #[test]
    fn test_assignees_skip_denylist() {
        let draft = IssueDraft::from_report(&sample_report(), &ReportTarget::default());
        assert_eq!(draft.assignees, vec!["bob".to_string()]);
    }

    #[test]
    fn test_body_sections() {
        let report = sample_report();
        let draft = IssueDraft::from_report(&report, &ReportTarget::default());
        let body = &draft.body;

        assert!(body.contains("This is currently breaking `python3Packages.jax`."));
        assert!(body.contains("```\nerror: builder for ... failed\n> boom\n```"));
        assert!(body.contains("python3Packages.jax maintainers cc: @alice\n"));
        assert!(body.contains("python312Packages.jaxlib maintainers cc: @bob @dotlambda\n"));
        assert!(body.contains("Other cc: n/a"));
        assert!(body.contains("2. Run `nix-build -A python312Packages.jaxlib`"));
        assert!(body.contains(
            "[full build log](https://github.com/samuela/nixpkgs-upkeep/actions/runs/42)"
        ));
        assert!(body.contains(&format!(
            "- Internal tags: {} {}",
            report.fingerprint.logs_tag, report.fingerprint.build_tag
        )));
    }

    #[test]
    fn test_body_other_cc() {
        let mut report = sample_report();
        report.cc = vec!["carol".to_string(), "dave".to_string()];
        let draft = IssueDraft::from_report(&report, &ReportTarget::default());
        assert!(draft.body.contains("Other cc: @carol @dave"));
    }

    #[test]
    fn test_gh_args() {
        let draft = IssueDraft::from_report(&sample_report(), &ReportTarget::default());
        let args = draft.gh_args("NixOS/nixpkgs");
        assert_eq!(
            &args[..6],
            &[
                "issue",
                "create",
                "--repo",
                "NixOS/nixpkgs",
                "--label",
                "0.kind: build failure"
            ]
        );
        assert_eq!(&args[6..8], &["--assignee", "bob"]);
        assert_eq!(args[8], "--title");
        assert_eq!(args[10], "--body");
    }

    #[test]
    fn test_gh_args_without_assignees() {
        let mut report = sample_report();
        report.context.failing_attr_maintainers.clear();
        let draft = IssueDraft::from_report(&report, &ReportTarget::default());
        assert!(!draft.gh_args("NixOS/nixpkgs").contains(&"--assignee".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_gh_reporter_failure_is_fatal() {
        let reporter = GhCliReporter::new(ReportTarget::default()).with_program("false");
        let err = reporter.report(&sample_report()).await.unwrap_err();
        assert!(matches!(err, CanaryError::Report(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_gh_reporter_success() {
        let reporter = GhCliReporter::new(ReportTarget::default()).with_program("true");
        reporter.report(&sample_report()).await.unwrap();
    }

    #[tokio::test]
    async fn test_gh_reporter_missing_binary() {
        let reporter =
            GhCliReporter::new(ReportTarget::default()).with_program("no-such-gh-binary-upkeep");
        let err = reporter.report(&sample_report()).await.unwrap_err();
        assert!(matches!(err, CanaryError::Spawn { .. }));
    }
}
