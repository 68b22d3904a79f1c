//! CLI tests for the orchestrator binary.
//!
//! Spawns the binary against a temp workspace and checks exit codes and the
//! stores each command touches.

use std::process::{Command, Output};

use orchestrator::exit_codes;
use orchestrator::graph::GraphStatus;
use orchestrator::io::config::{ServiceConfig, write_config};
use orchestrator::io::graph_store::load_graph;
use orchestrator::io::queue::load_queue;
use orchestrator::test_support::TestWorkspace;

fn orchestrator(workspace: &TestWorkspace, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_orchestrator"))
        .arg("--workspace")
        .arg(workspace.root())
        .args(args)
        .output()
        .expect("run orchestrator")
}

/// Completion command that ignores the prompt and prints non-JSON text.
fn with_unhelpful_model(workspace: &TestWorkspace) {
    let mut cfg = ServiceConfig::default();
    cfg.completion.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        "cat >/dev/null; echo 'no idea'".to_string(),
    ];
    cfg.completion.timeout_secs = 30;
    write_config(&workspace.paths.service_config(), &cfg).expect("write config");
}

#[test]
fn status_without_a_run_succeeds() {
    let workspace = TestWorkspace::new();
    let output = orchestrator(&workspace, &["status"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "no run recorded");
}

#[test]
fn empty_goal_is_invalid() {
    let workspace = TestWorkspace::new();
    let output = orchestrator(&workspace, &["run", "  "]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("goal must not be empty"));
}

#[test]
fn unusable_model_output_ends_blocked() {
    let workspace = TestWorkspace::new();
    with_unhelpful_model(&workspace);

    let output = orchestrator(&workspace, &["run", "rename the photos"]);
    assert_eq!(output.status.code(), Some(exit_codes::BLOCKED));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Failed:\n- rename the photos"));

    let graph = load_graph(&workspace.paths.graph())
        .expect("load")
        .expect("snapshot");
    assert_eq!(graph.status, GraphStatus::Blocked);
    assert_eq!(graph.nodes.len(), 1);

    let status = orchestrator(&workspace, &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&status.stdout).contains("[blocked] rename the photos"));
}

#[test]
fn enqueue_queues_background_requests() {
    let workspace = TestWorkspace::new();
    let output = orchestrator(
        &workspace,
        &["enqueue", "--requester", "chat-1", "research flight prices"],
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("queued bg-"));

    let queue = load_queue(&workspace.paths.queue()).expect("queue");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].requester, "chat-1");
    assert_eq!(queue[0].route_reason, "job verb 'research'");
    assert_eq!(queue[0].max_attempts, ServiceConfig::default().worker.max_attempts_default);
}

#[test]
fn tick_runs_a_queued_task_and_writes_the_outbox() {
    let workspace = TestWorkspace::new();
    with_unhelpful_model(&workspace);
    let queued = orchestrator(
        &workspace,
        &["enqueue", "--requester", "chat-7", "--force-background", "hello"],
    );
    assert_eq!(queued.status.code(), Some(exit_codes::OK));

    let output = orchestrator(&workspace, &["tick"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&output.stdout).contains("(run blocked)"));

    let outbox = std::fs::read_to_string(workspace.paths.outbox()).expect("outbox");
    assert_eq!(outbox.lines().count(), 1);
    assert!(outbox.contains("\"requester\":\"chat-7\""));

    let idle = orchestrator(&workspace, &["tick"]);
    assert!(String::from_utf8_lossy(&idle.stdout).contains("idle"));
}

#[test]
fn maintain_reports_an_empty_workspace() {
    let workspace = TestWorkspace::new();
    let output = orchestrator(&workspace, &["maintain"]);
    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "archived 0 history line(s), scored 0 procedure(s)"
    );
}
