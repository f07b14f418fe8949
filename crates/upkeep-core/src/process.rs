//! Child process execution with live, per-stream line capture.
//!
//! The build's stdout and stderr are drained from a single readiness-driven
//! loop: whichever pipe has a complete line first is serviced first, so the
//! child can never block on a full pipe buffer while the other stream is
//! being read. Every line is echoed to the matching console stream as soon as
//! it arrives and appended to that stream's capture buffer.
//!
//! Capture ends once the child has exited and a drain round reads nothing,
//! so a background descendant holding the pipes open cannot stall the run.
//!
//! Order is preserved within a stream. The relative order of stdout and
//! stderr lines is not recorded.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{CanaryError, Result};

/// Exit code reported when the platform gives neither a code nor a signal.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// A command to run, with the options that affect how it is captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,

    /// Arguments passed verbatim.
    pub args: Vec<String>,

    /// Working directory; inherits the caller's when `None`.
    pub current_dir: Option<PathBuf>,

    /// Echo captured lines to the console while the command runs.
    pub mirror: bool,
}

impl CommandSpec {
    /// Create a spec that mirrors output to the console.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
            mirror: true,
        }
    }

    /// `nix-build --fallback -A <attr>`.
    ///
    /// `--fallback` builds from source when a substituter fails, so a flaky
    /// cache is not mistaken for a build failure.
    pub fn nix_build(attr: &str) -> Self {
        Self::new("nix-build", ["--fallback", "-A", attr])
    }

    /// Run the command in `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Capture without echoing to the console.
    pub fn quiet(mut self) -> Self {
        self.mirror = false;
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exit code and captured output of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// Exit code; `128 + signal` when the child was killed by a signal.
    pub exit_code: i32,

    /// Raw stdout lines, in emission order, terminators included.
    pub stdout_lines: Vec<Vec<u8>>,

    /// Raw stderr lines, in emission order, terminators included.
    pub stderr_lines: Vec<Vec<u8>>,
}

impl ProcessResult {
    /// Whether the child exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stderr decoded as lossy UTF-8 with line terminators removed.
    pub fn stderr_text(&self) -> Vec<String> {
        decode_lines(&self.stderr_lines)
    }

    /// Stdout decoded as lossy UTF-8 with line terminators removed.
    pub fn stdout_text(&self) -> Vec<String> {
        decode_lines(&self.stdout_lines)
    }
}

/// Decode raw captured lines, dropping a trailing `\n` or `\r\n`.
pub fn decode_lines(lines: &[Vec<u8>]) -> Vec<String> {
    lines
        .iter()
        .map(|raw| {
            let line = raw.strip_suffix(b"\n").unwrap_or(raw);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            String::from_utf8_lossy(line).into_owned()
        })
        .collect()
}

/// Console stream a captured line is mirrored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    Stdout,
    Stderr,
}

impl ConsoleTarget {
    fn prefix(self) -> &'static [u8] {
        match self {
            ConsoleTarget::Stdout => b"stdout: ",
            ConsoleTarget::Stderr => b"stderr: ",
        }
    }

    fn name(self) -> &'static str {
        match self {
            ConsoleTarget::Stdout => "stdout",
            ConsoleTarget::Stderr => "stderr",
        }
    }

    fn console(self) -> ConsoleSink {
        match self {
            ConsoleTarget::Stdout => Box::new(tokio::io::stdout()),
            ConsoleTarget::Stderr => Box::new(tokio::io::stderr()),
        }
    }
}

/// Destination for mirrored lines.
pub type ConsoleSink = Box<dyn AsyncWrite + Unpin + Send>;

/// Run `spec` to completion, mirroring and capturing both output streams.
///
/// Fails only if the command cannot be started or its pipes break; a
/// non-zero exit is reported through [`ProcessResult::exit_code`].
pub async fn run_command(spec: &CommandSpec) -> Result<ProcessResult> {
    if spec.program.is_empty() {
        return Err(CanaryError::EmptyCommand);
    }

    info!(">>> {}", spec.display());

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.current_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|source| CanaryError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or(CanaryError::PipeUnavailable { stream: "stdout" })?;
    let stderr = child
        .stderr
        .take()
        .ok_or(CanaryError::PipeUnavailable { stream: "stderr" })?;

    let (stdout_sink, stderr_sink) = if spec.mirror {
        (
            Some(ConsoleTarget::Stdout.console()),
            Some(ConsoleTarget::Stderr.console()),
        )
    } else {
        (None, None)
    };

    let (status, stdout_lines, stderr_lines) =
        multiplex_until_exit(stdout, stderr, stdout_sink, stderr_sink, child.wait())
            .await
            .map_err(CanaryError::Capture)?;
    let status = status.map_err(CanaryError::Capture)?;
    let exit_code = exit_code(status);
    debug!(
        exit_code,
        stdout_lines = stdout_lines.len(),
        stderr_lines = stderr_lines.len(),
        "child exited"
    );

    Ok(ProcessResult {
        exit_code,
        stdout_lines,
        stderr_lines,
    })
}

/// How long output must stay quiet after the child exits before capture
/// stops. Descendants that inherited the pipes may keep them open forever.
pub const EXIT_DRAIN_QUIET: Duration = Duration::from_millis(200);

/// Captured lines of one stream, in the order they were read.
pub type CapturedLines = Vec<Vec<u8>>;

/// Drain two readers concurrently until both reach end-of-stream.
///
/// Returns the captured lines of each reader in the order they were read.
/// Lines are forwarded to the matching sink (prefixed with the stream name)
/// before they are stored.
pub async fn multiplex<O, E>(
    stdout: O,
    stderr: E,
    stdout_sink: Option<ConsoleSink>,
    stderr_sink: Option<ConsoleSink>,
) -> io::Result<(CapturedLines, CapturedLines)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (_, out, err) = drain(
        stdout,
        stderr,
        stdout_sink,
        stderr_sink,
        std::future::pending::<()>(),
    )
    .await?;
    Ok((out, err))
}

/// Drain two readers while waiting for `exited`.
///
/// Capture stops when both readers reach end-of-stream, or once `exited` has
/// resolved and neither reader produced data for [`EXIT_DRAIN_QUIET`].
/// Returns the output of `exited` with both captures.
pub async fn multiplex_until_exit<O, E, F>(
    stdout: O,
    stderr: E,
    stdout_sink: Option<ConsoleSink>,
    stderr_sink: Option<ConsoleSink>,
    exited: F,
) -> io::Result<(F::Output, CapturedLines, CapturedLines)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    F: Future,
{
    tokio::pin!(exited);
    let (status, out, err) = drain(stdout, stderr, stdout_sink, stderr_sink, &mut exited).await?;
    let status = match status {
        Some(status) => status,
        None => exited.await,
    };
    Ok((status, out, err))
}

async fn drain<O, E, F>(
    stdout: O,
    stderr: E,
    stdout_sink: Option<ConsoleSink>,
    stderr_sink: Option<ConsoleSink>,
    exited: F,
) -> io::Result<(Option<F::Output>, CapturedLines, CapturedLines)>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
    F: Future,
{
    let mut out = Channel::new(stdout, ConsoleTarget::Stdout, stdout_sink);
    let mut err = Channel::new(stderr, ConsoleTarget::Stderr, stderr_sink);
    tokio::pin!(exited);
    let mut status = None;

    // `read_until` keeps partially read bytes in `pending` if another branch
    // wins the race, so losing a select round never drops data. The quiet
    // timer restarts every round, so it only fires after a round with no data.
    while !(out.done && err.done) {
        tokio::select! {
            read = out.reader.read_until(b'\n', &mut out.pending), if !out.done => {
                out.settle(read?).await?;
            }
            read = err.reader.read_until(b'\n', &mut err.pending), if !err.done => {
                err.settle(read?).await?;
            }
            result = &mut exited, if status.is_none() => {
                debug!("child exited, draining remaining output");
                status = Some(result);
            }
            _ = tokio::time::sleep(EXIT_DRAIN_QUIET), if status.is_some() => {
                debug!(
                    stdout_open = !out.done,
                    stderr_open = !err.done,
                    "output quiet after exit, leaving inherited pipes open"
                );
                break;
            }
        }
    }

    out.finish().await?;
    err.finish().await?;
    Ok((status, out.lines, err.lines))
}

struct Channel<R> {
    reader: BufReader<R>,
    target: ConsoleTarget,
    sink: Option<ConsoleSink>,
    pending: Vec<u8>,
    lines: Vec<Vec<u8>>,
    done: bool,
}

impl<R: AsyncRead + Unpin> Channel<R> {
    fn new(reader: R, target: ConsoleTarget, sink: Option<ConsoleSink>) -> Self {
        Self {
            reader: BufReader::new(reader),
            target,
            sink,
            pending: Vec::new(),
            lines: Vec::new(),
            done: false,
        }
    }

    /// Record the outcome of one `read_until` call.
    ///
    /// A zero-length read is end-of-stream; anything already buffered from an
    /// interrupted read is still flushed as the final line.
    async fn settle(&mut self, read: usize) -> io::Result<()> {
        self.emit_pending().await?;
        if read == 0 {
            debug!(stream = self.target.name(), lines = self.lines.len(), "end of stream");
            self.done = true;
        }
        Ok(())
    }

    /// Keep an unterminated trailing line and flush the mirror.
    async fn finish(&mut self) -> io::Result<()> {
        self.emit_pending().await?;
        if let Some(sink) = self.sink.as_mut() {
            sink.flush().await?;
        }
        Ok(())
    }

    async fn emit_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.pending);
        if let Some(sink) = self.sink.as_mut() {
            sink.write_all(self.target.prefix()).await?;
            sink.write_all(&line).await?;
            if !line.ends_with(b"\n") {
                sink.write_all(b"\n").await?;
            }
            sink.flush().await?;
        }
        self.lines.push(line);
        Ok(())
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(UNKNOWN_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(UNKNOWN_EXIT_CODE)
}
