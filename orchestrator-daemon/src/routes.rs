//! Read-only HTTP API over the workspace stores.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use orchestrator::graph::TaskGraph;
use orchestrator::io::graph_store::load_graph;
use orchestrator::io::ledger::{RunLedger, RunLedgerEvent};
use orchestrator::io::queue::{BackgroundTask, load_queue};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::state::{AppState, LoopReport};

const DEFAULT_LEDGER_LIMIT: usize = 50;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/graph", get(get_graph))
        .route("/queue", get(get_queue))
        .route("/ledger", get(get_ledger))
        .route("/daemon", get(get_daemon))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/graph - current run snapshot.
async fn get_graph(State(state): State<AppState>) -> Result<Json<TaskGraph>, StatusCode> {
    match load_graph(&state.paths.graph()) {
        Ok(Some(graph)) => Ok(Json(graph)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => Err(internal(&err)),
    }
}

/// GET /api/queue - background tasks in queue order.
async fn get_queue(State(state): State<AppState>) -> Result<Json<Vec<BackgroundTask>>, StatusCode> {
    load_queue(&state.paths.queue())
        .map(Json)
        .map_err(|err| internal(&err))
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    limit: Option<usize>,
}

/// GET /api/ledger?limit=N - the most recent ledger events, oldest first.
async fn get_ledger(
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<RunLedgerEvent>>, StatusCode> {
    let events = RunLedger::new(state.paths.ledger())
        .events()
        .map_err(|err| internal(&err))?;
    let limit = query.limit.unwrap_or(DEFAULT_LEDGER_LIMIT);
    let skip = events.len().saturating_sub(limit);
    Ok(Json(events.into_iter().skip(skip).collect()))
}

#[derive(Debug, Serialize)]
struct DaemonStatus {
    last_tick: Option<LoopReport>,
    last_maintenance: Option<LoopReport>,
}

/// GET /api/daemon - latest worker tick and maintenance results.
async fn get_daemon(State(state): State<AppState>) -> Json<DaemonStatus> {
    Json(DaemonStatus {
        last_tick: state.last_tick().await,
        last_maintenance: state.last_maintenance().await,
    })
}

fn internal(err: &anyhow::Error) -> StatusCode {
    warn!(err = %format!("{err:#}"), "store read failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::io::ledger::Actor;
    use orchestrator::io::paths::WorkspacePaths;

    fn state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(WorkspacePaths::new(dir.path()));
        (dir, state)
    }

    #[tokio::test]
    async fn missing_graph_is_not_found() {
        let (_dir, state) = state();
        let err = get_graph(State(state)).await.expect_err("no snapshot");
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ledger_returns_the_tail() {
        let (_dir, state) = state();
        let ledger = RunLedger::new(state.paths.ledger());
        for idx in 0..5 {
            ledger
                .append(&RunLedgerEvent::new(
                    "task.executed",
                    "run-1",
                    Actor::Executor,
                    format!("step {idx}"),
                ))
                .expect("append");
        }
        let Json(events) = get_ledger(State(state), Query(LedgerQuery { limit: Some(2) }))
            .await
            .expect("ledger");
        let messages: Vec<&str> = events.iter().map(|event| event.message.as_str()).collect();
        assert_eq!(messages, vec!["step 3", "step 4"]);
    }

    #[tokio::test]
    async fn daemon_status_reflects_recorded_loops() {
        let (_dir, state) = state();
        state.record_tick("idle").await;
        let Json(status) = get_daemon(State(state)).await;
        assert_eq!(status.last_tick.map(|report| report.outcome), Some("idle".to_string()));
        assert!(status.last_maintenance.is_none());
    }
}
