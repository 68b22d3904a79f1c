//! Shared state for the daemon's loops and HTTP handlers.

use std::sync::Arc;

use orchestrator::io::ledger::now_rfc3339;
use orchestrator::io::paths::WorkspacePaths;
use serde::Serialize;
use tokio::sync::RwLock;

/// Latest result of one periodic loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopReport {
    pub at: String,
    pub outcome: String,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub paths: WorkspacePaths,
    last_tick: Arc<RwLock<Option<LoopReport>>>,
    last_maintenance: Arc<RwLock<Option<LoopReport>>>,
}

impl AppState {
    pub fn new(paths: WorkspacePaths) -> Self {
        Self {
            paths,
            last_tick: Arc::new(RwLock::new(None)),
            last_maintenance: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn record_tick(&self, outcome: impl Into<String>) {
        *self.last_tick.write().await = Some(report(outcome));
    }

    pub async fn record_maintenance(&self, outcome: impl Into<String>) {
        *self.last_maintenance.write().await = Some(report(outcome));
    }

    pub async fn last_tick(&self) -> Option<LoopReport> {
        self.last_tick.read().await.clone()
    }

    pub async fn last_maintenance(&self) -> Option<LoopReport> {
        self.last_maintenance.read().await.clone()
    }
}

fn report(outcome: impl Into<String>) -> LoopReport {
    LoopReport {
        at: now_rfc3339(),
        outcome: outcome.into(),
    }
}
