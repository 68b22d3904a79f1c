//! Background Task Queue worker.
//!
//! A tick claims at most one task and runs it through the [`Engine`]. Two
//! guards keep ticks from overlapping: an in-process flag (overlapping ticks
//! are dropped, not queued) and the durable lease shared by every process on
//! the workspace.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::router::{RouteDecision, RouteMode, route_request};
use crate::engine::Engine;
use crate::graph::GraphStatus;
use crate::io::completion::CompletionService;
use crate::io::config::ServiceConfig;
use crate::io::lease::{holds, process_owner_id, release, renew, try_acquire};
use crate::io::ledger::{Actor, EventStatus, RunLedger, RunLedgerEvent, now_rfc3339};
use crate::io::notify::Notifier;
use crate::io::paths::WorkspacePaths;
use crate::io::queue::{BackgroundTask, TaskStatus, enqueue, load_queue, next_claimable, save_queue};
use crate::io::shell::ShellRunner;

pub const INTERRUPTED_ERROR: &str = "interrupted before completion";
pub const LEASE_LOST_ERROR: &str = "worker lease lost";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub lease_ttl: chrono::Duration,
    pub prompt_budget_bytes: usize,
}

impl WorkerSettings {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        Self {
            lease_ttl: i64::try_from(cfg.worker.lease_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or_else(|| chrono::Duration::hours(1)),
            prompt_budget_bytes: cfg.completion.prompt_budget_bytes,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another tick in this process was still running.
    Overlapping,
    /// Another worker holds a live lease.
    LeaseHeld,
    /// Nothing claimable.
    Idle,
    Completed {
        task_id: String,
        run_status: GraphStatus,
    },
    Failed {
        task_id: String,
        attempts: u32,
        exhausted: bool,
    },
    /// Another worker took the lease mid-run; the task is left to it.
    LeaseLost {
        task_id: String,
    },
}

pub struct BackgroundWorker {
    paths: WorkspacePaths,
    completion: Arc<dyn CompletionService>,
    shell: Arc<dyn ShellRunner>,
    notifier: Arc<dyn Notifier>,
    settings: WorkerSettings,
    owner: String,
    running: AtomicBool,
    ledger: RunLedger,
}

/// Clears the in-process flag when a tick ends, including on error.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BackgroundWorker {
    pub fn new(
        paths: WorkspacePaths,
        completion: Arc<dyn CompletionService>,
        shell: Arc<dyn ShellRunner>,
        notifier: Arc<dyn Notifier>,
        settings: WorkerSettings,
    ) -> Self {
        let ledger = RunLedger::new(paths.ledger());
        Self {
            paths,
            completion,
            shell,
            notifier,
            settings,
            owner: process_owner_id(),
            running: AtomicBool::new(false),
            ledger,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Claim and run at most one background task.
    #[instrument(skip_all, fields(owner = %self.owner))]
    pub fn tick(&self) -> Result<TickOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("previous tick still running, skipping");
            return Ok(TickOutcome::Overlapping);
        }
        let _guard = RunningGuard(&self.running);

        let lease_path = self.paths.worker_lease();
        if !try_acquire(&lease_path, &self.owner, self.settings.lease_ttl, Utc::now())? {
            debug!("worker lease held elsewhere, skipping");
            return Ok(TickOutcome::LeaseHeld);
        }
        let outcome = self.claim_and_run();
        if let Err(err) = release(&lease_path, &self.owner) {
            warn!(err = %format!("{err:#}"), "failed to release worker lease");
        }
        outcome
    }

    fn claim_and_run(&self) -> Result<TickOutcome> {
        let queue_path = self.paths.queue();
        let mut tasks = load_queue(&queue_path)?;
        let recovered = self.recover_interrupted(&mut tasks, Utc::now());

        let Some(idx) = next_claimable(&tasks) else {
            if recovered {
                save_queue(&queue_path, &tasks)?;
            }
            return Ok(TickOutcome::Idle);
        };
        tasks[idx].status = TaskStatus::Running;
        tasks[idx].attempts += 1;
        tasks[idx].updated_at = now_rfc3339();
        let claimed = tasks[idx].clone();
        save_queue(&queue_path, &tasks)?;
        info!(task_id = %claimed.id, attempt = claimed.attempts, "claimed background task");
        self.record(
            RunLedgerEvent::new("background.claimed", &claimed.id, Actor::System, "claimed background task")
                .data(json!({
                    "attempt": claimed.attempts,
                    "max_attempts": claimed.max_attempts,
                    "requester": claimed.requester,
                })),
        );

        let result = {
            let heartbeat = || self.heartbeat(&claimed.id);
            Engine::new(
                &self.paths,
                self.completion.as_ref(),
                self.shell.as_ref(),
                self.settings.prompt_budget_bytes,
            )
            .with_heartbeat(&heartbeat)
            .run_goal(&claimed.request_text)
        };

        if result.is_err() && !holds(&self.paths.worker_lease(), &self.owner)? {
            warn!(task_id = %claimed.id, "lease lost mid-run, leaving the task to its new holder");
            return Ok(TickOutcome::LeaseLost { task_id: claimed.id });
        }

        // Re-read: tasks may have been enqueued while the run was in flight.
        let mut tasks = load_queue(&queue_path)?;
        let idx = tasks
            .iter()
            .position(|task| task.id == claimed.id)
            .ok_or_else(|| anyhow!("background task '{}' disappeared from the queue", claimed.id))?;
        tasks[idx].updated_at = now_rfc3339();

        match result {
            Ok(run) => {
                tasks[idx].status = TaskStatus::Done;
                tasks[idx].last_error = None;
                save_queue(&queue_path, &tasks)?;
                info!(task_id = %claimed.id, run_status = run.status().as_str(), "background task done");
                self.record(
                    RunLedgerEvent::new("background.completed", &claimed.id, Actor::System, "background task done")
                        .data(json!({
                            "run_id": run.graph.run_id,
                            "run_status": run.status().as_str(),
                        })),
                );
                self.deliver(&claimed.requester, &run.summary);
                Ok(TickOutcome::Completed {
                    task_id: claimed.id,
                    run_status: run.status(),
                })
            }
            Err(err) => {
                let message = format!("{err:#}");
                tasks[idx].status = TaskStatus::Failed;
                tasks[idx].last_error = Some(message.clone());
                let attempts = tasks[idx].attempts;
                let exhausted = tasks[idx].attempts_exhausted();
                save_queue(&queue_path, &tasks)?;
                warn!(task_id = %claimed.id, attempts, exhausted, err = %message, "background task failed");
                self.record(
                    RunLedgerEvent::new("background.failed", &claimed.id, Actor::System, &message)
                        .status(EventStatus::Error)
                        .data(json!({ "attempts": attempts, "exhausted": exhausted })),
                );
                if exhausted {
                    self.deliver(&claimed.requester, &permanent_failure_message(&tasks[idx]));
                }
                Ok(TickOutcome::Failed {
                    task_id: claimed.id,
                    attempts,
                    exhausted,
                })
            }
        }
    }

    /// Renew the lease and stamp the running task so other workers see it is alive.
    fn heartbeat(&self, task_id: &str) -> Result<()> {
        if !renew(&self.paths.worker_lease(), &self.owner, self.settings.lease_ttl, Utc::now())? {
            bail!(LEASE_LOST_ERROR);
        }
        let queue_path = self.paths.queue();
        let mut tasks = load_queue(&queue_path)?;
        if let Some(task) = tasks.iter_mut().find(|task| task.id == task_id) {
            task.updated_at = now_rfc3339();
            save_queue(&queue_path, &tasks)?;
        }
        Ok(())
    }

    /// A `running` task not stamped within one lease TTL was left behind by a dead worker.
    fn recover_interrupted(&self, tasks: &mut [BackgroundTask], now: DateTime<Utc>) -> bool {
        let ttl = self.settings.lease_ttl;
        let mut recovered = false;
        for task in tasks
            .iter_mut()
            .filter(|task| task.status == TaskStatus::Running && is_stale(task, ttl, now))
        {
            warn!(task_id = %task.id, "recovering interrupted background task");
            task.status = TaskStatus::Failed;
            task.last_error = Some(INTERRUPTED_ERROR.to_string());
            task.updated_at = now_rfc3339();
            recovered = true;
            if task.attempts_exhausted() {
                self.deliver(&task.requester, &permanent_failure_message(task));
            }
        }
        recovered
    }

    fn deliver(&self, requester: &str, message: &str) {
        if let Err(err) = self.notifier.notify(requester, message) {
            warn!(requester, err = %format!("{err:#}"), "failed to deliver background result");
        }
    }

    fn record(&self, event: RunLedgerEvent) {
        if let Err(err) = self.ledger.append(&event) {
            warn!(event = %event.event, err = %format!("{err:#}"), "failed to append ledger event");
        }
    }
}

fn is_stale(task: &BackgroundTask, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
    match DateTime::parse_from_rfc3339(&task.updated_at) {
        Ok(updated_at) => updated_at
            .with_timezone(&Utc)
            .checked_add_signed(ttl)
            .is_none_or(|fresh_until| fresh_until <= now),
        Err(_) => true,
    }
}

fn permanent_failure_message(task: &BackgroundTask) -> String {
    format!(
        "Background task {} failed after {} attempt(s): {}",
        task.id,
        task.attempts,
        task.last_error.as_deref().unwrap_or("unknown error")
    )
}

/// Where an incoming request ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The caller should run the request directly.
    Inline(RouteDecision),
    Queued(BackgroundTask),
}

/// Route `text` and enqueue it when it belongs in the background.
pub fn submit_request(
    paths: &WorkspacePaths,
    text: &str,
    requester: &str,
    max_attempts: u32,
    force_background: bool,
) -> Result<Submission> {
    let text = text.trim();
    if text.is_empty() {
        return Err(anyhow!("request must not be empty"));
    }
    let decision = route_request(text);
    let reason = match decision.mode {
        RouteMode::Background => decision.reason,
        RouteMode::Inline if force_background => "forced background".to_string(),
        RouteMode::Inline => return Ok(Submission::Inline(decision)),
    };
    let task = BackgroundTask::new(text, requester, reason, max_attempts, &now_rfc3339());
    enqueue(&paths.queue(), task).map(Submission::Queued)
}
