//! Service configuration stored under `.orchestrator/state/service.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::files::write_atomic;

/// Service configuration (TOML).
///
/// Edited by humans; missing fields default to values suitable for a single
/// local deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub completion: CompletionConfig,
    pub install: InstallConfig,
    pub worker: WorkerConfig,
    pub maintenance: MaintenanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompletionConfig {
    /// Command that reads a prompt on stdin and prints the completion on stdout.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate completion stdout beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Maximum bytes for a rendered prompt before context sections are dropped.
    pub prompt_budget_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallConfig {
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    pub tick_interval_secs: u64,
    /// How long a claimed lease stays valid without being released.
    pub lease_secs: u64,
    /// `max_attempts` given to newly enqueued background tasks.
    pub max_attempts_default: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    pub history_retention_days: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            command: vec!["codex".to_string(), "exec".to_string(), "-".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 200_000,
            prompt_budget_bytes: 40_000,
        }
    }
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10 * 60,
            output_limit_bytes: 20_000,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            lease_secs: 60 * 60,
            max_attempts_default: 3,
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 6 * 60 * 60,
            history_retention_days: 30,
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl InstallConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.completion.command.is_empty() || self.completion.command[0].trim().is_empty() {
            return Err(anyhow!("completion.command must be a non-empty array"));
        }
        if self.completion.timeout_secs == 0 {
            return Err(anyhow!("completion.timeout_secs must be > 0"));
        }
        if self.completion.output_limit_bytes == 0 {
            return Err(anyhow!("completion.output_limit_bytes must be > 0"));
        }
        if self.completion.prompt_budget_bytes == 0 {
            return Err(anyhow!("completion.prompt_budget_bytes must be > 0"));
        }
        if self.install.timeout_secs == 0 {
            return Err(anyhow!("install.timeout_secs must be > 0"));
        }
        if self.install.output_limit_bytes == 0 {
            return Err(anyhow!("install.output_limit_bytes must be > 0"));
        }
        if self.worker.tick_interval_secs == 0 {
            return Err(anyhow!("worker.tick_interval_secs must be > 0"));
        }
        if self.worker.lease_secs == 0 {
            return Err(anyhow!("worker.lease_secs must be > 0"));
        }
        if self.worker.max_attempts_default == 0 {
            return Err(anyhow!("worker.max_attempts_default must be > 0"));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(anyhow!("maintenance.interval_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ServiceConfig::default()`.
pub fn load_config(path: &Path) -> Result<ServiceConfig> {
    if !path.exists() {
        let cfg = ServiceConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ServiceConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ServiceConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
