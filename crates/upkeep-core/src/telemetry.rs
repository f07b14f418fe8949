//! Log setup for `upkeep-canary`.
//!
//! The canary's stdout carries the build's own output, mirrored line by line
//! as `stdout: ...`. Logs therefore go to stderr, next to the mirrored
//! `stderr: ...` lines, and never split a mirrored stdout line.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Install the canary's subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `level` (`--verbose` selects `DEBUG`). `json` switches
/// to one JSON object per line for CI log collectors. A second call is
/// ignored, so tests may call it freely.
pub fn init_tracing(json: bool, level: Level) {
    let stderr = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let output: Box<dyn Layer<Registry> + Send + Sync> = if json {
        stderr.json().boxed()
    } else {
        stderr.boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(log_filter(level))
        .try_init()
        .ok();
}

fn log_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}
