//! Autonomous goal runner CLI.
//!
//! Plans a goal into a task graph (`.orchestrator/state/graph.json`), executes
//! and critiques each task, and manages the background queue and memory
//! housekeeping for one workspace.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use orchestrator::core::summary::render_summary;
use orchestrator::engine::{Engine, RunResult};
use orchestrator::exit_codes;
use orchestrator::graph::GraphStatus;
use orchestrator::io::completion::CommandCompletion;
use orchestrator::io::config::{ServiceConfig, load_config};
use orchestrator::io::graph_store::load_graph;
use orchestrator::io::notify::OutboxNotifier;
use orchestrator::io::paths::WorkspacePaths;
use orchestrator::io::shell::RestrictedShell;
use orchestrator::logging;
use orchestrator::maintenance::run_maintenance;
use orchestrator::worker::{BackgroundWorker, Submission, TickOutcome, WorkerSettings, submit_request};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Autonomous planner/executor/critic goal runner"
)]
struct Cli {
    /// Workspace root (contains .orchestrator/).
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan and execute a goal until it is done or blocked.
    Run {
        /// Goal text.
        goal: String,
    },
    /// Continue the persisted run after an interruption.
    Resume,
    /// Route a request: queue it for the background worker or run it inline.
    Enqueue {
        /// Identity the result is delivered to.
        #[arg(long)]
        requester: String,
        /// Queue even when the router would run the request inline.
        #[arg(long)]
        force_background: bool,
        /// Request text.
        text: String,
    },
    /// Claim and run at most one background task.
    Tick,
    /// Archive old history and re-score procedures.
    Maintain,
    /// Print the persisted run's status and summary.
    Status,
}

fn main() {
    logging::init("warn");
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let paths = WorkspacePaths::new(&cli.workspace);
    match cli.command {
        Command::Run { goal } => cmd_run(&paths, &goal),
        Command::Resume => cmd_resume(&paths),
        Command::Enqueue {
            requester,
            force_background,
            text,
        } => cmd_enqueue(&paths, &requester, force_background, &text),
        Command::Tick => cmd_tick(&paths),
        Command::Maintain => cmd_maintain(&paths),
        Command::Status => cmd_status(&paths),
    }
}

fn load_service_config(paths: &WorkspacePaths) -> Result<ServiceConfig> {
    let path = paths.service_config();
    load_config(&path).with_context(|| format!("load {}", path.display()))
}

fn run_inline(paths: &WorkspacePaths, config: &ServiceConfig, goal: &str) -> Result<i32> {
    let completion = CommandCompletion::new(&config.completion, paths.root());
    let shell = RestrictedShell::new(&config.install);
    let engine = Engine::new(paths, &completion, &shell, config.completion.prompt_budget_bytes);
    let result = engine.run_goal(goal)?;
    Ok(report_run(&result))
}

fn cmd_run(paths: &WorkspacePaths, goal: &str) -> Result<i32> {
    let config = load_service_config(paths)?;
    run_inline(paths, &config, goal)
}

fn cmd_resume(paths: &WorkspacePaths) -> Result<i32> {
    let config = load_service_config(paths)?;
    let completion = CommandCompletion::new(&config.completion, paths.root());
    let shell = RestrictedShell::new(&config.install);
    let engine = Engine::new(paths, &completion, &shell, config.completion.prompt_budget_bytes);
    let Some(result) = engine.resume_run()? else {
        bail!("no persisted run to resume in {}", paths.graph().display());
    };
    Ok(report_run(&result))
}

fn cmd_enqueue(paths: &WorkspacePaths, requester: &str, force_background: bool, text: &str) -> Result<i32> {
    let config = load_service_config(paths)?;
    match submit_request(
        paths,
        text,
        requester,
        config.worker.max_attempts_default,
        force_background,
    )? {
        Submission::Queued(task) => {
            println!("queued {} ({})", task.id, task.route_reason);
            Ok(exit_codes::OK)
        }
        Submission::Inline(decision) => {
            eprintln!("running inline ({})", decision.reason);
            run_inline(paths, &config, text)
        }
    }
}

fn cmd_tick(paths: &WorkspacePaths) -> Result<i32> {
    let config = load_service_config(paths)?;
    let worker = BackgroundWorker::new(
        paths.clone(),
        Arc::new(CommandCompletion::new(&config.completion, paths.root())),
        Arc::new(RestrictedShell::new(&config.install)),
        Arc::new(OutboxNotifier::new(paths.outbox())),
        WorkerSettings::from_config(&config),
    );
    match worker.tick()? {
        TickOutcome::Overlapping | TickOutcome::LeaseHeld => println!("skipped: worker busy"),
        TickOutcome::Idle => println!("idle: nothing to claim"),
        TickOutcome::LeaseLost { task_id } => println!("abandoned {task_id}: worker lease lost"),
        TickOutcome::Completed { task_id, run_status } => {
            println!("completed {task_id} (run {})", run_status.as_str());
        }
        TickOutcome::Failed {
            task_id,
            attempts,
            exhausted,
        } => {
            let state = if exhausted { "permanently" } else { "will retry" };
            println!("failed {task_id} after {attempts} attempt(s), {state}");
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_maintain(paths: &WorkspacePaths) -> Result<i32> {
    let config = load_service_config(paths)?;
    let report = run_maintenance(paths, &config.maintenance, chrono::Utc::now())?;
    println!(
        "archived {} history line(s), scored {} procedure(s)",
        report.archived_lines, report.procedures_scored
    );
    Ok(exit_codes::OK)
}

fn cmd_status(paths: &WorkspacePaths) -> Result<i32> {
    let Some(graph) = load_graph(&paths.graph())? else {
        println!("no run recorded");
        return Ok(exit_codes::OK);
    };
    println!("{} [{}] {}", graph.run_id, graph.status.as_str(), graph.goal);
    let summary = if graph.status.is_terminal() {
        graph.summary.clone()
    } else {
        render_summary(&graph)
    };
    println!("{summary}");
    Ok(exit_codes::OK)
}

fn report_run(result: &RunResult) -> i32 {
    println!("{}", result.summary);
    match result.status() {
        GraphStatus::Done => exit_codes::OK,
        _ => exit_codes::BLOCKED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_default_workspace() {
        let cli = Cli::parse_from(["orchestrator", "run", "convert the video"]);
        assert_eq!(cli.workspace, PathBuf::from("."));
        assert!(matches!(cli.command, Command::Run { ref goal } if goal == "convert the video"));
    }

    #[test]
    fn parse_enqueue_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "orchestrator",
            "enqueue",
            "--requester",
            "chat-1",
            "--force-background",
            "hello",
            "--workspace",
            "/tmp/ws",
        ]);
        assert_eq!(cli.workspace, PathBuf::from("/tmp/ws"));
        assert!(matches!(
            cli.command,
            Command::Enqueue {
                force_background: true,
                ..
            }
        ));
    }

    #[test]
    fn enqueue_requires_requester() {
        assert!(Cli::try_parse_from(["orchestrator", "enqueue", "hello"]).is_err());
    }
}
