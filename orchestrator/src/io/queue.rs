//! Background task queue (`.orchestrator/state/queue.json`).
//!
//! The whole queue is a JSON array rewritten atomically on every save. Tasks
//! are never deleted; `done` and exhausted `failed` tasks stay for audit.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::io::files::{read_optional, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: String,
    pub status: TaskStatus,
    pub request_text: String,
    /// Identity the result is delivered to (chat id, user id, ...).
    pub requester: String,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub route_reason: String,
    pub created_at: String,
    pub updated_at: String,
}

impl BackgroundTask {
    pub fn new(
        request_text: impl Into<String>,
        requester: impl Into<String>,
        route_reason: impl Into<String>,
        max_attempts: u32,
        now: &str,
    ) -> Self {
        Self {
            id: new_task_id(),
            status: TaskStatus::Pending,
            request_text: request_text.into(),
            requester: requester.into(),
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            route_reason: route_reason.into(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    /// Pending, or failed with attempts left.
    pub fn is_claimable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Failed)
            && self.attempts < self.max_attempts
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Fresh opaque id for a background task.
pub fn new_task_id() -> String {
    format!("bg-{:016x}", rand::random::<u64>())
}

/// Index of the first claimable task, in queue order.
pub fn next_claimable(tasks: &[BackgroundTask]) -> Option<usize> {
    tasks.iter().position(BackgroundTask::is_claimable)
}

pub fn load_queue(path: &Path) -> Result<Vec<BackgroundTask>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents).with_context(|| format!("parse queue {}", path.display()))
}

pub fn save_queue(path: &Path, tasks: &[BackgroundTask]) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(tasks).context("serialize queue")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Append a new pending task and persist the queue.
pub fn enqueue(path: &Path, task: BackgroundTask) -> Result<BackgroundTask> {
    let mut tasks = load_queue(path)?;
    tasks.push(task.clone());
    save_queue(path, &tasks)?;
    info!(task_id = %task.id, requester = %task.requester, reason = %task.route_reason, "enqueued background task");
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus, attempts: u32, max_attempts: u32) -> BackgroundTask {
        BackgroundTask {
            status,
            attempts,
            ..BackgroundTask::new("job", "chat-1", "test", max_attempts, "now")
        }
    }

    #[test]
    fn claimable_skips_running_done_and_exhausted() {
        let tasks = vec![
            task(TaskStatus::Running, 1, 3),
            task(TaskStatus::Done, 1, 3),
            task(TaskStatus::Failed, 2, 2),
            task(TaskStatus::Failed, 1, 2),
            task(TaskStatus::Pending, 0, 2),
        ];
        assert_eq!(next_claimable(&tasks), Some(3));
        assert_eq!(next_claimable(&tasks[..3]), None);
    }

    #[test]
    fn enqueue_appends_and_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state").join("queue.json");
        let first = enqueue(&path, BackgroundTask::new("a", "u", "r", 2, "t")).expect("enqueue");
        let second = enqueue(&path, BackgroundTask::new("b", "u", "r", 2, "t")).expect("enqueue");
        assert_ne!(first.id, second.id);

        let tasks = load_queue(&path).expect("load");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].status, TaskStatus::Pending);
        assert_eq!(tasks[1].request_text, "b");
    }

    #[test]
    fn zero_max_attempts_is_clamped() {
        assert_eq!(BackgroundTask::new("a", "u", "r", 0, "t").max_attempts, 1);
    }
}
