//! Test-only helpers: graph builders and scripted collaborators.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{AutonomousRuntimeConfig, PlannedTask};
use crate::graph::{GraphStatus, Risk, SideEffect, TaskGraph, TaskNode};
use crate::io::completion::CompletionService;
use crate::io::notify::Notifier;
use crate::io::paths::WorkspacePaths;
use crate::io::runtime_config::write_runtime_config;
use crate::io::shell::{ShellOutput, ShellRunner};

pub const TEST_NOW: &str = "2026-01-01T00:00:00Z";

/// Create a pending node titled `"<id> title"` with the given dependencies.
pub fn node_with_deps(id: &str, deps: &[&str]) -> TaskNode {
    TaskNode {
        depends_on: deps.iter().map(|dep| dep.to_string()).collect(),
        ..TaskNode::new(id, format!("{id} title"))
    }
}

/// Wrap nodes in an `executing` graph.
pub fn graph_with(nodes: Vec<TaskNode>) -> TaskGraph {
    TaskGraph {
        status: GraphStatus::Executing,
        nodes,
        ..TaskGraph::new("run-test", "test goal", TEST_NOW)
    }
}

/// A validated planner task titled `"<id> title"`.
pub fn planned(id: &str, deps: &[&str]) -> PlannedTask {
    PlannedTask {
        id: id.to_string(),
        title: format!("{id} title"),
        depends_on: deps.iter().map(|dep| dep.to_string()).collect(),
        acceptance_criteria: Vec::new(),
        risk: Risk::default(),
        side_effect: SideEffect::default(),
    }
}

/// Which agent a prompt was rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Planner,
    Executor,
    Critic,
}

impl Role {
    fn of_prompt(prompt: &str) -> Option<Self> {
        if prompt.contains("### Planner Contract") {
            Some(Role::Planner)
        } else if prompt.contains("### Executor Contract") {
            Some(Role::Executor)
        } else if prompt.contains("### Critic Contract") {
            Some(Role::Critic)
        } else {
            None
        }
    }
}

/// Completion service that answers each role from its own queue.
///
/// An exhausted queue, or a response scripted with [`ScriptedCompletion::fail`],
/// is returned as a completion error.
#[derive(Default)]
pub struct ScriptedCompletion {
    planner: Mutex<VecDeque<Result<String, String>>>,
    executor: Mutex<VecDeque<Result<String, String>>>,
    critic: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<(Role, String)>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, role: Role) -> &Mutex<VecDeque<Result<String, String>>> {
        match role {
            Role::Planner => &self.planner,
            Role::Executor => &self.executor,
            Role::Critic => &self.critic,
        }
    }

    pub fn respond(self, role: Role, response: impl Into<String>) -> Self {
        self.queue(role)
            .lock()
            .expect("script lock")
            .push_back(Ok(response.into()));
        self
    }

    pub fn fail(self, role: Role, error: impl Into<String>) -> Self {
        self.queue(role)
            .lock()
            .expect("script lock")
            .push_back(Err(error.into()));
        self
    }

    pub fn planner(self, response: impl Into<String>) -> Self {
        self.respond(Role::Planner, response)
    }

    pub fn executor(self, response: impl Into<String>) -> Self {
        self.respond(Role::Executor, response)
    }

    pub fn critic(self, response: impl Into<String>) -> Self {
        self.respond(Role::Critic, response)
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<(Role, String)> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn calls(&self, role: Role) -> usize {
        self.prompts().iter().filter(|(r, _)| *r == role).count()
    }
}

impl CompletionService for ScriptedCompletion {
    fn complete(&self, prompt: &str) -> Result<String> {
        let role = Role::of_prompt(prompt).ok_or_else(|| anyhow!("unrecognized prompt"))?;
        self.prompts
            .lock()
            .map_err(|_| anyhow!("prompts lock poisoned"))?
            .push((role, prompt.to_string()));
        let next = self
            .queue(role)
            .lock()
            .map_err(|_| anyhow!("script lock poisoned"))?
            .pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(anyhow!(error)),
            None => Err(anyhow!("no scripted {role:?} response left")),
        }
    }
}

/// Executor JSON reporting `status` for `task_id`.
pub fn exec_json(task_id: &str, status: &str, summary: &str) -> String {
    serde_json::json!({
        "task_id": task_id,
        "status": status,
        "summary": summary,
        "missing_dependency": null,
    })
    .to_string()
}

/// Critic JSON with `verdict` for `task_id`.
pub fn critic_json(task_id: &str, verdict: &str, issues: &[&str]) -> String {
    serde_json::json!({
        "task_id": task_id,
        "verdict": verdict,
        "issues": issues,
    })
    .to_string()
}

/// Shell that records commands and exits with a fixed code.
pub struct ScriptedShell {
    exit_code: Option<i32>,
    commands: Mutex<Vec<String>>,
}

impl ScriptedShell {
    pub fn exiting(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }
}

impl ShellRunner for ScriptedShell {
    fn run(&self, command: &str, _workdir: &Path, _env: &[(String, String)]) -> Result<ShellOutput> {
        self.commands
            .lock()
            .map_err(|_| anyhow!("commands lock poisoned"))?
            .push(command.to_string());
        Ok(ShellOutput {
            exit_code: self.exit_code,
            output: format!("scripted exit {:?}", self.exit_code),
        })
    }
}

/// Notifier that keeps every `(requester, message)` pair.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, requester: &str, message: &str) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow!("sent lock poisoned"))?
            .push((requester.to_string(), message.to_string()));
        Ok(())
    }
}

/// Temporary workspace root with resolved paths.
pub struct TestWorkspace {
    pub dir: TempDir,
    pub paths: WorkspacePaths,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(dir.path());
        Self { dir, paths }
    }

    pub fn with_runtime(cfg: &AutonomousRuntimeConfig) -> Self {
        let workspace = Self::new();
        write_runtime_config(&workspace.paths.runtime_config(), cfg).expect("write runtime config");
        workspace
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
