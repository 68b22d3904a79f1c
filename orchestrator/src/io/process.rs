//! Bounded child processes: a hard timeout and a cap on captured output.
//!
//! Both pipes are drained on their own threads for the whole lifetime of the
//! child, so a chatty process can never stall on a full pipe while we wait.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is read and discarded.
    pub output_limit_bytes: usize,
}

/// One captured stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the limit and thrown away.
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal (including our timeout).
    pub exit_code: Option<i32>,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stderr then stdout, trimmed, with notes for dropped bytes and timeouts.
    ///
    /// This is what installs attach to the critic prompt and what completion
    /// errors carry.
    pub fn report(&self, label: &str) -> String {
        let mut parts = Vec::new();
        for (stream, captured) in [("stderr", &self.stderr), ("stdout", &self.stdout)] {
            let text = captured.text();
            if text.trim().is_empty() {
                continue;
            }
            parts.push(text.trim().to_string());
            if captured.dropped > 0 {
                parts.push(format!("[{label} {stream} truncated {} bytes]", captured.dropped));
            }
        }
        if self.timed_out {
            parts.push(format!("[{label} timed out]"));
        }
        parts.join("\n")
    }
}

/// Spawn `cmd`, optionally feed `stdin`, and wait at most `limits.timeout`.
///
/// A process still running at the deadline is killed and reported with
/// `timed_out`. Errors are reserved for spawn and pipe failures.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, stdin: Option<&[u8]>, limits: ProcessLimits) -> Result<ProcessOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "child spawned");

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;
    let stdout_reader = thread::spawn(move || drain(stdout, limit));
    let stderr_reader = thread::spawn(move || drain(stderr, limit));

    if let Some(input) = stdin {
        let mut pipe = child.stdin.take().ok_or_else(|| anyhow!("stdin was not piped"))?;
        if let Err(err) = pipe.write_all(input) {
            if err.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(err).context("write stdin");
            }
            debug!("child closed stdin before reading all input");
        }
        // Dropping the pipe sends EOF.
    }

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = limits.timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    let stdout = join(stdout_reader).context("collect stdout")?;
    let stderr = join(stderr_reader).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(stdout_dropped = stdout.dropped, stderr_dropped = stderr.dropped, "output truncated");
    }
    debug!(exit_code = ?status.code(), timed_out, "command finished");

    Ok(ProcessOutput {
        exit_code: status.code(),
        stdout,
        stderr,
        timed_out,
    })
}

fn join(reader: JoinHandle<Result<Captured>>) -> Result<Captured> {
    reader
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

fn drain<R: Read>(mut stream: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let read = stream.read(&mut chunk).context("read output")?;
        if read == 0 {
            return Ok(captured);
        }
        let keep = read.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += read - keep;
    }
}
