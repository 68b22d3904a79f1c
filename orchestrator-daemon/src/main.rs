//! Orchestrator daemon: drives the background worker and maintenance on
//! timers and serves a read-only monitoring API.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use orchestrator::io::completion::CommandCompletion;
use orchestrator::io::config::{MaintenanceConfig, load_config};
use orchestrator::io::notify::OutboxNotifier;
use orchestrator::io::paths::WorkspacePaths;
use orchestrator::io::shell::RestrictedShell;
use orchestrator::maintenance::maintenance_cycle;
use orchestrator::worker::{BackgroundWorker, TickOutcome, WorkerSettings};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "orchestrator-daemon")]
#[command(about = "Background worker, maintenance timer and monitoring API")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Workspace root (contains .orchestrator/)
    #[arg(long, default_value = ".")]
    workspace: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("orchestrator=info".parse()?)
                .add_directive("orchestrator_daemon=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let root = args.workspace.canonicalize().unwrap_or(args.workspace);
    info!(workspace = %root.display(), "starting orchestrator-daemon");
    let paths = WorkspacePaths::new(&root);
    let config_path = paths.service_config();
    let config =
        load_config(&config_path).with_context(|| format!("load {}", config_path.display()))?;

    let worker = Arc::new(BackgroundWorker::new(
        paths.clone(),
        Arc::new(CommandCompletion::new(&config.completion, paths.root())),
        Arc::new(RestrictedShell::new(&config.install)),
        Arc::new(OutboxNotifier::new(paths.outbox())),
        WorkerSettings::from_config(&config),
    ));
    info!(owner = worker.owner(), "worker ready");

    let state = AppState::new(paths);
    let worker_loop = spawn_worker_loop(
        worker,
        state.clone(),
        Duration::from_secs(config.worker.tick_interval_secs.max(1)),
    );
    let maintenance_loop = spawn_maintenance_loop(config.maintenance.clone(), state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker_loop.abort();
    maintenance_loop.abort();
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
    }
}

/// Fire a worker tick on every interval without waiting for the previous one.
///
/// The worker itself reports overlapping ticks.
fn spawn_worker_loop(
    worker: Arc<BackgroundWorker>,
    state: AppState,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let worker = Arc::clone(&worker);
            let state = state.clone();
            tokio::spawn(async move {
                let outcome = tokio::task::spawn_blocking(move || worker.tick()).await;
                let described = match outcome {
                    Ok(Ok(outcome)) => describe_tick(&outcome),
                    Ok(Err(err)) => {
                        error!(err = %format!("{err:#}"), "worker tick failed");
                        format!("error: {err:#}")
                    }
                    Err(err) => {
                        error!(error = %err, "worker tick panicked");
                        format!("error: {err}")
                    }
                };
                state.record_tick(described).await;
            });
        }
    })
}

fn spawn_maintenance_loop(cfg: MaintenanceConfig, state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let paths = state.paths.clone();
            let cycle_cfg = cfg.clone();
            let outcome =
                tokio::task::spawn_blocking(move || maintenance_cycle(&paths, &cycle_cfg)).await;
            let described = match outcome {
                Ok(()) => "completed".to_string(),
                Err(err) => {
                    error!(error = %err, "maintenance panicked");
                    format!("error: {err}")
                }
            };
            state.record_maintenance(described).await;
        }
    })
}

fn describe_tick(outcome: &TickOutcome) -> String {
    match outcome {
        TickOutcome::Overlapping => "skipped: previous tick still running".to_string(),
        TickOutcome::LeaseHeld => "skipped: lease held by another worker".to_string(),
        TickOutcome::Idle => "idle".to_string(),
        TickOutcome::LeaseLost { task_id } => format!("abandoned {task_id}: lease lost"),
        TickOutcome::Completed { task_id, run_status } => {
            format!("completed {task_id} (run {})", run_status.as_str())
        }
        TickOutcome::Failed {
            task_id,
            attempts,
            exhausted,
        } => {
            let state = if *exhausted { "permanently" } else { "will retry" };
            format!("failed {task_id} after {attempts} attempt(s), {state}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::graph::GraphStatus;

    #[test]
    fn describes_tick_outcomes() {
        assert_eq!(describe_tick(&TickOutcome::Idle), "idle");
        assert_eq!(
            describe_tick(&TickOutcome::Completed {
                task_id: "bg-1".to_string(),
                run_status: GraphStatus::Blocked,
            }),
            "completed bg-1 (run blocked)"
        );
        assert_eq!(
            describe_tick(&TickOutcome::Failed {
                task_id: "bg-2".to_string(),
                attempts: 3,
                exhausted: true,
            }),
            "failed bg-2 after 3 attempt(s), permanently"
        );
    }
}
