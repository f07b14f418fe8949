//! nixpkgs-upkeep core library
//!
//! The build-failure triage pipeline behind the `upkeep-canary` binary:
//! run one `nix-build`, decide whether its failure is worth reporting,
//! fingerprint it, and file an issue unless one already exists.

pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fakes;
pub mod fingerprint;
pub mod normalize;
pub mod package;
pub mod pipeline;
pub mod process;
pub mod report;
pub mod telemetry;

pub use classify::{Classification, EnvironmentalCause, FailureClassifier, FailureRecord};
pub use config::{CanaryConfig, ReportTarget, SearchConfig, DEFAULT_MAX_JITTER, DONT_ASSIGN};
pub use dedup::{DedupGate, DedupVerdict, GitHubIssueSearch, IssueSearch};
pub use error::{CanaryError, Result};
pub use fingerprint::{fingerprint, DedupTag, Fingerprint, TAG_NAMESPACE};
pub use normalize::{LogNormalizer, NormalizedExcerpt};
pub use package::{pname_to_attr, split_pname_version, PackageIdentity};
pub use pipeline::{CanaryPipeline, PipelineOutcome};
pub use process::{run_command, CommandSpec, ProcessResult};
pub use report::{
    FailureReport, GhCliReporter, IssueDraft, ReportContext, ReportContextProvider, Reporter,
    WorkflowRun,
};
pub use telemetry::init_tracing;
