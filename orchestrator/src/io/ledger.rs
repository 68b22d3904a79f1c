//! Append-only run ledger (`.orchestrator/ledger/runs.jsonl`).
//!
//! One JSON object per line. The ledger is the product audit trail: it is
//! written regardless of `RUST_LOG` and is never rewritten by this crate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::graph::SideEffect;
use crate::io::files::{append, read_optional};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    Planner,
    Executor,
    Critic,
    Governor,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLedgerEvent {
    pub event: String,
    pub run_id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    pub actor: Actor,
    pub status: EventStatus,
    pub side_effect: SideEffect,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub ts: String,
}

impl RunLedgerEvent {
    /// A `status: ok`, read-only event stamped with the current time.
    pub fn new(
        event: impl Into<String>,
        run_id: impl Into<String>,
        actor: Actor,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event: event.into(),
            run_id: run_id.into(),
            task_id: None,
            actor,
            status: EventStatus::Ok,
            side_effect: SideEffect::Read,
            message: message.into(),
            data: Value::Null,
            ts: now_rfc3339(),
        }
    }

    pub fn task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn side_effect(mut self, side_effect: SideEffect) -> Self {
        self.side_effect = side_effect;
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Current UTC time as RFC 3339 with second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, Clone)]
pub struct RunLedger {
    path: PathBuf,
}

impl RunLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &RunLedgerEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize ledger event")?;
        line.push('\n');
        append(&self.path, &line)
    }

    /// Raw ledger lines in file order; blank lines are skipped.
    pub fn lines(&self) -> Result<Vec<String>> {
        Ok(read_optional(&self.path)?
            .unwrap_or_default()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Parsed events; lines that do not parse are skipped with a warning.
    pub fn events(&self) -> Result<Vec<RunLedgerEvent>> {
        Ok(self
            .lines()?
            .into_iter()
            .enumerate()
            .filter_map(|(idx, line)| match serde_json::from_str(&line) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(line = idx + 1, err = %err, "skipping malformed ledger line");
                    None
                }
            })
            .collect())
    }
}
