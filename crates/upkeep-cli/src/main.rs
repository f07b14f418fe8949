//! nixpkgs-upkeep canary
//!
//! The `upkeep-canary` command builds one nixpkgs attribute and, when the build
//! fails in a new way, files an issue on NixOS/nixpkgs.
//!
//! ## Exit codes
//!
//! - `0`: the build succeeded, failed for environmental reasons, was already
//!   reported, or a new report was filed
//! - the build's own exit code: the failure could not be attributed to a
//!   single builder
//! - `1`: the canary itself failed (search, `gh`, or spawning `nix-build`)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};
use upkeep_core::{
    init_tracing, CanaryConfig, CanaryPipeline, GhCliReporter, GitHubIssueSearch, PipelineOutcome,
};
use upkeep_nix::{is_nix_available, NixpkgsCheckout};

#[derive(Parser, Debug)]
#[command(name = "upkeep-canary")]
#[command(author = "nixpkgs-upkeep contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build a nixpkgs attribute and report new build failures", long_about = None)]
struct Cli {
    /// Attribute to build, e.g. `python3Packages.jax`
    #[arg(long)]
    attr: String,

    /// Extra GitHub handle to cc on filed issues (repeatable)
    #[arg(long)]
    cc: Vec<String>,

    /// Path to the nixpkgs checkout
    #[arg(long, default_value = ".")]
    nixpkgs: PathBuf,

    /// Upper bound of the random delay before searching for duplicates
    #[arg(long, env = "UPKEEP_MAX_JITTER_SECS")]
    max_jitter_secs: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn config(&self) -> CanaryConfig {
        let mut config = CanaryConfig::from_env(&self.attr)
            .with_nixpkgs(&self.nixpkgs)
            .with_cc(self.cc.clone());
        if let Some(secs) = self.max_jitter_secs {
            config = config.with_max_jitter(Duration::from_secs(secs));
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    if !is_nix_available() {
        warn!("nix not found on PATH; the build will fail to start");
    }

    let config = cli.config();
    if config.search.token.is_none() {
        warn!("GITHUB_TOKEN is not set; issue search is rate limited");
    }

    let outcome = run(config).await?;
    let code = outcome.exit_code();
    info!(?outcome, exit_code = code, "Canary finished");
    std::process::exit(code);
}

async fn run(config: CanaryConfig) -> Result<PipelineOutcome> {
    let search = GitHubIssueSearch::new(config.search.clone())
        .context("Failed to create issue search client")?;
    let checkout = NixpkgsCheckout::new(&config.nixpkgs);
    let reporter = GhCliReporter::new(config.report.clone());

    let pipeline = CanaryPipeline::new(config, search, checkout, reporter)
        .context("Failed to initialise the canary pipeline")?;
    let outcome = pipeline
        .run()
        .await
        .with_context(|| format!("Canary run for `{}` failed", pipeline.config().attr))?;
    Ok(outcome)
}
