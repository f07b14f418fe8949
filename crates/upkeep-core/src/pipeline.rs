//! The canary pipeline: build, triage, dedup, report.
//!
//! Stages run strictly in order and never loop back:
//!
//! 1. run `nix-build` with live output capture ([`crate::process`])
//! 2. classify the failure ([`crate::classify`])
//! 3. normalize the excerpt and derive tags ([`crate::normalize`], [`crate::fingerprint`])
//! 4. sleep the jitter, then search for each tag ([`crate::dedup`])
//! 5. gather context and file the report ([`crate::report`])
//!
//! Every non-fatal path ends in a [`PipelineOutcome`], whose
//! [`exit_code`](PipelineOutcome::exit_code) is what the process exits with.

use tracing::info;

use crate::classify::{Classification, EnvironmentalCause, FailureClassifier};
use crate::config::CanaryConfig;
use crate::dedup::{DedupGate, DedupVerdict, IssueSearch};
use crate::error::Result;
use crate::fingerprint::{fingerprint, DedupTag, Fingerprint};
use crate::normalize::LogNormalizer;
use crate::package::{pname_to_attr, split_pname_version};
use crate::process::{run_command, CommandSpec, ProcessResult};
use crate::report::{FailureReport, ReportContextProvider, Reporter, WorkflowRun};

/// How a canary run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The build succeeded.
    BuildSucceeded,
    /// The build failed for an environmental reason; nothing filed.
    Environmental(EnvironmentalCause),
    /// The failure could not be attributed to a single builder.
    Unclassifiable { exit_code: i32 },
    /// An issue with this tag already exists; nothing filed.
    AlreadyReported { tag: DedupTag, matches: u64 },
    /// A new issue was filed.
    Reported { fingerprint: Fingerprint },
}

impl PipelineOutcome {
    /// Process exit code for this outcome.
    ///
    /// Only unclassifiable failures propagate the build's exit code. A
    /// suppressed duplicate exits 0 like a filed report: downstream treats any
    /// failing canary as actionable, and a known failure is not new work.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutcome::Unclassifiable { exit_code } => *exit_code,
            _ => 0,
        }
    }
}

/// One canary run over injected collaborators.
pub struct CanaryPipeline<S, C, R> {
    config: CanaryConfig,
    classifier: FailureClassifier,
    normalizer: LogNormalizer,
    gate: DedupGate<S>,
    context: C,
    reporter: R,
    workflow: WorkflowRun,
}

impl<S, C, R> CanaryPipeline<S, C, R>
where
    S: IssueSearch,
    C: ReportContextProvider,
    R: Reporter,
{
    pub fn new(config: CanaryConfig, search: S, context: C, reporter: R) -> Result<Self> {
        let gate = DedupGate::new(search, config.search.clone(), config.max_jitter);
        Ok(Self {
            classifier: FailureClassifier::new()?,
            normalizer: LogNormalizer::new()?,
            gate,
            context,
            reporter,
            workflow: WorkflowRun::from_env(),
            config,
        })
    }

    /// Override the CI run link (defaults to [`WorkflowRun::from_env`]).
    pub fn with_workflow(mut self, workflow: WorkflowRun) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn config(&self) -> &CanaryConfig {
        &self.config
    }

    pub fn gate(&self) -> &DedupGate<S> {
        &self.gate
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// The build command for the configured attribute.
    pub fn build_command(&self) -> CommandSpec {
        CommandSpec::nix_build(&self.config.attr).current_dir(&self.config.nixpkgs)
    }

    /// Run the configured `nix-build` and triage its result.
    pub async fn run(&self) -> Result<PipelineOutcome> {
        self.run_with(&self.build_command()).await
    }

    /// Run `command` in place of `nix-build` and triage its result.
    pub async fn run_with(&self, command: &CommandSpec) -> Result<PipelineOutcome> {
        let result = run_command(command).await?;
        self.triage(&result).await
    }

    /// Triage an already captured build.
    pub async fn triage(&self, result: &ProcessResult) -> Result<PipelineOutcome> {
        let record = match self.classifier.classify(result) {
            Classification::Success => return Ok(PipelineOutcome::BuildSucceeded),
            Classification::NotReportable(cause) => {
                return Ok(PipelineOutcome::Environmental(cause))
            }
            Classification::Unclassifiable { exit_code } => {
                return Ok(PipelineOutcome::Unclassifiable { exit_code })
            }
            Classification::Classified(record) => record,
        };

        let normalized = self.normalizer.normalize(&record.excerpt_lines);
        let fingerprint = fingerprint(&record, &normalized);
        info!(
            logs_tag = %fingerprint.logs_tag,
            build_tag = %fingerprint.build_tag,
            "computed dedup tags"
        );

        self.gate.wait_jitter().await;
        for tag in fingerprint.tags() {
            info!(%tag, "Looking for existing issues");
            if let DedupVerdict::AlreadyReported { matches } = self.gate.check(tag).await? {
                return Ok(PipelineOutcome::AlreadyReported {
                    tag: tag.clone(),
                    matches,
                });
            }
        }

        let identity = split_pname_version(&record.package_name_version);
        let failing_attr = pname_to_attr(&identity.name);
        let context = self.context.gather(&self.config.attr, &failing_attr).await?;

        let report = FailureReport {
            attr: self.config.attr.clone(),
            failing_attr,
            record,
            fingerprint: fingerprint.clone(),
            context,
            cc: self.config.cc.clone(),
            dont_assign: self.config.dont_assign.clone(),
            workflow: self.workflow.clone(),
        };
        self.reporter.report(&report).await?;
        info!(failing_attr = %report.failing_attr, "Filed build failure report");

        Ok(PipelineOutcome::Reported { fingerprint })
    }
}
