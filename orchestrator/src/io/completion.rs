//! Completion service abstraction.
//!
//! The [`CompletionService`] trait decouples the engine from the language-model
//! backend. Tests use scripted services that return predetermined completions
//! without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::io::config::CompletionConfig;
use crate::io::process::{ProcessLimits, run_bounded};

/// Opaque prompt-to-completion function.
pub trait CompletionService: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Completion service that spawns a configured command (default `codex exec -`)
/// with the prompt on stdin and returns its stdout.
#[derive(Debug, Clone)]
pub struct CommandCompletion {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandCompletion {
    pub fn new(cfg: &CompletionConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: cfg.command.clone(),
            workdir: workdir.into(),
            timeout: cfg.timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl CompletionService for CommandCompletion {
    #[instrument(skip_all, fields(program = ?self.command.first(), prompt_len = prompt.len()))]
    fn complete(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("completion command is empty"))?;
        info!(workdir = %self.workdir.display(), "requesting completion");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_bounded(
            cmd,
            Some(prompt.as_bytes()),
            ProcessLimits {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
            },
        )
        .with_context(|| format!("run completion command {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "completion timed out");
            return Err(anyhow!("completion timed out after {:?}", self.timeout));
        }
        if !output.succeeded() {
            warn!(exit_code = ?output.exit_code, "completion command failed");
            return Err(anyhow!(
                "completion command failed with status {:?}: {}",
                output.exit_code,
                output.report("completion")
            ));
        }

        debug!(bytes = output.stdout.bytes.len(), "completion received");
        Ok(output.stdout.text())
    }
}
