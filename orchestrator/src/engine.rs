//! Task Graph Engine: drives one run from goal to a terminal graph.
//!
//! Every mutation goes through [`transition::apply`] and the resulting graph is
//! saved before the next model or shell call, so an interrupted run can be
//! picked up by [`Engine::resume_run`].

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agents::critic::CriticAgent;
use crate::agents::executor::ExecutorAgent;
use crate::agents::planner::PlannerAgent;
use crate::core::budget::iteration_budget;
use crate::core::invariants::validate_invariants;
use crate::core::selector::{next_runnable, stranded_nodes, terminal_status};
use crate::core::summary::render_summary;
use crate::core::transition::{
    self, GraphEvent, ITERATION_BUDGET_EXHAUSTED, Outcome, replan_retained_ids,
};
use crate::core::types::{AutonomousRuntimeConfig, ContextPack, ExecStatus};
use crate::graph::{GraphStatus, NodeStatus, SideEffect, TaskGraph, TaskNode};
use crate::io::completion::CompletionService;
use crate::io::context::build_context_pack;
use crate::io::escalation::{InstallEscalator, InstallOutcome};
use crate::io::graph_store::{load_graph, save_graph};
use crate::io::ledger::{Actor, EventStatus, RunLedger, RunLedgerEvent, now_rfc3339};
use crate::io::paths::WorkspacePaths;
use crate::io::prompt::{CriticPrompt, ExecutorPrompt, PlannerPrompt};
use crate::io::runtime_config::load_runtime_config;
use crate::io::shell::ShellRunner;

pub const POLICY_DENIED_ISSUE: &str = "external mutation not allowed by policy";
pub const ITERATION_BUDGET_NOTE: &str = "Stopped: iteration budget exhausted.";

/// Final summary plus the graph snapshot it was rendered from.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub summary: String,
    pub graph: TaskGraph,
}

impl RunResult {
    pub fn status(&self) -> GraphStatus {
        self.graph.status
    }
}

pub struct Engine<'a, C: CompletionService + ?Sized, S: ShellRunner + ?Sized> {
    paths: &'a WorkspacePaths,
    completion: &'a C,
    shell: &'a S,
    cfg: AutonomousRuntimeConfig,
    planner: PlannerAgent,
    executor: ExecutorAgent,
    critic: CriticAgent,
    ledger: RunLedger,
    heartbeat: Option<&'a dyn Fn() -> Result<()>>,
}

impl<'a, C: CompletionService + ?Sized, S: ShellRunner + ?Sized> Engine<'a, C, S> {
    /// Build an engine for the workspace, loading `state/runtime.json` (defaults on error).
    pub fn new(
        paths: &'a WorkspacePaths,
        completion: &'a C,
        shell: &'a S,
        prompt_budget_bytes: usize,
    ) -> Self {
        Self {
            paths,
            completion,
            shell,
            cfg: load_runtime_config(&paths.runtime_config()),
            planner: PlannerAgent::new(prompt_budget_bytes),
            executor: ExecutorAgent::new(prompt_budget_bytes),
            critic: CriticAgent::new(prompt_budget_bytes),
            ledger: RunLedger::new(paths.ledger()),
            heartbeat: None,
        }
    }

    /// Call `heartbeat` before every model-driven step. An error stops the run.
    pub fn with_heartbeat(mut self, heartbeat: &'a dyn Fn() -> Result<()>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn config(&self) -> &AutonomousRuntimeConfig {
        &self.cfg
    }

    /// Plan and execute `goal` until the graph is `done` or `blocked`.
    ///
    /// Model and shell problems never surface here; errors mean a durable
    /// store could not be read or written.
    #[instrument(skip_all)]
    pub fn run_goal(&self, goal: &str) -> Result<RunResult> {
        let goal = goal.trim();
        if goal.is_empty() {
            bail!("goal must not be empty");
        }

        let graph = TaskGraph::new(new_run_id(), goal, &now_rfc3339());
        save_graph(&self.paths.graph(), &graph)?;
        info!(run_id = %graph.run_id, "run started");
        self.record(
            RunLedgerEvent::new("run.started", &graph.run_id, Actor::System, "run started")
                .data(json!({ "goal": goal })),
        )?;

        let graph = self.plan(graph)?;
        self.drive(graph)
    }

    /// Continue the persisted run, if any.
    ///
    /// A finished snapshot is returned as-is. Otherwise interrupted nodes go
    /// back to `pending` and the loop continues from the saved state.
    #[instrument(skip_all)]
    pub fn resume_run(&self) -> Result<Option<RunResult>> {
        let Some(graph) = load_graph(&self.paths.graph())? else {
            return Ok(None);
        };
        if graph.status.is_terminal() {
            return Ok(Some(RunResult {
                summary: graph.summary.clone(),
                graph,
            }));
        }

        let previous = graph.status;
        let (graph, _) = self.step(graph, &GraphEvent::Resumed)?;
        info!(run_id = %graph.run_id, from = previous.as_str(), "run resumed");
        self.record(
            RunLedgerEvent::new("run.resumed", &graph.run_id, Actor::System, "run resumed")
                .data(json!({ "from_status": previous.as_str() })),
        )?;

        let graph = if graph.status == GraphStatus::Planning {
            self.plan(graph)?
        } else {
            graph
        };
        self.drive(graph).map(Some)
    }

    fn plan(&self, graph: TaskGraph) -> Result<TaskGraph> {
        self.beat()?;
        let pack = self.context_pack(&graph, &graph.goal)?;
        let record = self.planner.run(
            self.completion,
            &PlannerPrompt {
                goal: &graph.goal,
                pack: &pack,
                max_tasks: self.cfg.max_tasks_per_plan,
                replan_reason: None,
                retained: &[],
            },
            &[],
        );

        let task_ids: Vec<&str> = record.tasks.iter().map(|task| task.id.as_str()).collect();
        let event = RunLedgerEvent::new(
            "plan.created",
            &graph.run_id,
            Actor::Planner,
            format!("planned {} task(s)", record.tasks.len()),
        )
        .status(if record.fallback {
            EventStatus::Warning
        } else {
            EventStatus::Ok
        })
        .data(json!({
            "task_ids": task_ids,
            "summary": record.summary,
            "fallback": record.fallback,
        }));

        let (graph, _) = self.step(
            graph,
            &GraphEvent::Planned {
                summary: record.summary.clone(),
                tasks: record.tasks.clone(),
            },
        )?;
        self.record(event)?;
        Ok(graph)
    }

    fn drive(&self, mut graph: TaskGraph) -> Result<RunResult> {
        let mut iterations = 0usize;
        loop {
            let Some(task_id) = next_runnable(&graph).map(|node| node.id.clone()) else {
                break;
            };
            let budget = iteration_budget(graph.nodes.len(), &self.cfg);
            if iterations >= budget {
                warn!(run_id = %graph.run_id, budget, "iteration budget exhausted");
                self.record(
                    RunLedgerEvent::new(
                        "run.iteration_budget_exhausted",
                        &graph.run_id,
                        Actor::System,
                        format!("stopped after {iterations} iterations"),
                    )
                    .status(EventStatus::Warning)
                    .data(json!({ "iterations": iterations, "budget": budget })),
                )?;
                let pending: Vec<String> = graph
                    .nodes_with_status(NodeStatus::Pending)
                    .map(|node| node.id.clone())
                    .collect();
                for task_id in pending {
                    (graph, _) = self.step(
                        graph,
                        &GraphEvent::Halted {
                            task_id: task_id.clone(),
                            issue: ITERATION_BUDGET_EXHAUSTED.to_string(),
                        },
                    )?;
                    self.record(
                        RunLedgerEvent::new(
                            "task.halted",
                            &graph.run_id,
                            Actor::System,
                            ITERATION_BUDGET_EXHAUSTED,
                        )
                        .task(&task_id)
                        .status(EventStatus::Warning),
                    )?;
                }
                return self.close(graph, GraphStatus::Blocked, Some(ITERATION_BUDGET_NOTE));
            }
            iterations += 1;
            self.beat()?;
            graph = self.dispatch(graph, &task_id)?;
        }
        self.finish(graph)
    }

    #[instrument(skip_all, fields(task_id = %task_id))]
    fn dispatch(&self, graph: TaskGraph, task_id: &str) -> Result<TaskGraph> {
        let node = find_node(&graph, task_id)?;
        if node.side_effect == SideEffect::ExternalMutation && !self.cfg.policy.allow_external_mutation {
            warn!("node requires external mutation, blocking");
            let (graph, _) = self.step(
                graph,
                &GraphEvent::PolicyDenied {
                    task_id: task_id.to_string(),
                    issue: POLICY_DENIED_ISSUE.to_string(),
                },
            )?;
            self.record(
                RunLedgerEvent::new("task.policy_denied", &graph.run_id, Actor::Governor, POLICY_DENIED_ISSUE)
                    .task(task_id)
                    .status(EventStatus::Warning)
                    .side_effect(SideEffect::ExternalMutation),
            )?;
            return Ok(graph);
        }

        let (graph, _) = self.step(
            graph,
            &GraphEvent::Started {
                task_id: task_id.to_string(),
            },
        )?;
        let node = find_node(&graph, task_id)?;
        let pack = self.context_pack(&graph, &format!("{}\n{}", graph.goal, node.title))?;
        let execution = self.executor.run(
            self.completion,
            &ExecutorPrompt {
                goal: &graph.goal,
                task: &node,
                pack: &pack,
            },
        );
        self.record(
            RunLedgerEvent::new("task.executed", &graph.run_id, Actor::Executor, &execution.summary)
                .task(task_id)
                .status(match execution.status {
                    ExecStatus::Done => EventStatus::Ok,
                    ExecStatus::Failed => EventStatus::Warning,
                })
                .side_effect(node.side_effect)
                .data(json!({
                    "status": execution.status.as_str(),
                    "missing_dependency": execution.missing_dependency,
                })),
        )?;

        let mut install_note = None;
        if let Some(hint) = &execution.missing_dependency {
            let escalator = InstallEscalator::new(self.paths, self.shell);
            match escalator.handle(&node, hint, &now_rfc3339())? {
                InstallOutcome::Installed { command } => {
                    let (graph, outcome) = self.step(
                        graph,
                        &GraphEvent::DependencyInstalled {
                            task_id: task_id.to_string(),
                        },
                    )?;
                    self.record(
                        RunLedgerEvent::new(
                            "dependency.installed",
                            &graph.run_id,
                            Actor::System,
                            format!("installed '{}'", hint.name),
                        )
                        .task(task_id)
                        .side_effect(SideEffect::WriteLocal)
                        .data(json!({
                            "dependency": hint.name,
                            "command": command,
                            "outcome": outcome_label(&outcome),
                        })),
                    )?;
                    return Ok(graph);
                }
                InstallOutcome::Escalated { detail } => {
                    let (graph, _) = self.step(
                        graph,
                        &GraphEvent::DependencyEscalated {
                            task_id: task_id.to_string(),
                            detail: detail.clone(),
                        },
                    )?;
                    self.record(
                        RunLedgerEvent::new("dependency.escalated", &graph.run_id, Actor::System, detail)
                            .task(task_id)
                            .status(EventStatus::Warning)
                            .data(json!({ "dependency": hint.name })),
                    )?;
                    return Ok(graph);
                }
                InstallOutcome::Failed { command, output } => {
                    self.record(
                        RunLedgerEvent::new(
                            "dependency.install_failed",
                            &graph.run_id,
                            Actor::System,
                            format!("install of '{}' failed", hint.name),
                        )
                        .task(task_id)
                        .status(EventStatus::Warning)
                        .side_effect(SideEffect::WriteLocal)
                        .data(json!({ "dependency": hint.name, "command": command, "output": output })),
                    )?;
                    install_note = Some(format!("Install command `{command}` failed:\n{output}"));
                }
            }
        }

        let (graph, _) = self.step(
            graph,
            &GraphEvent::Executed {
                task_id: task_id.to_string(),
            },
        )?;
        let critique = self.critic.run(
            self.completion,
            &CriticPrompt {
                goal: &graph.goal,
                task: &node,
                execution: &execution,
                install_note: install_note.as_deref(),
                pack: &pack,
            },
        );
        let verdict = critique.verdict.as_str().to_string();
        let issues = critique.issues.clone();
        let (graph, outcome) = self.step(
            graph,
            &GraphEvent::Criticized {
                task_id: task_id.to_string(),
                exec_status: execution.status,
                exec_summary: execution.summary.clone(),
                critique,
            },
        )?;
        self.record(
            RunLedgerEvent::new(
                "task.criticized",
                &graph.run_id,
                Actor::Critic,
                format!("verdict {verdict}"),
            )
            .task(task_id)
            .status(match outcome {
                Outcome::NodeDone | Outcome::RetryScheduled { .. } | Outcome::ReplanRequested { .. } => {
                    EventStatus::Ok
                }
                _ => EventStatus::Warning,
            })
            .data(json!({
                "verdict": verdict,
                "issues": issues,
                "outcome": outcome_label(&outcome),
            })),
        )?;

        match outcome {
            Outcome::ReplanRequested { .. } => self.replan(graph, task_id),
            _ => Ok(graph),
        }
    }

    /// Replace the failed subtree of `task_id` with a fresh plan.
    fn replan(&self, graph: TaskGraph, task_id: &str) -> Result<TaskGraph> {
        self.beat()?;
        let issues = find_node(&graph, task_id)?.critic_issues.unwrap_or_default();
        let reason = if issues.is_empty() {
            "critic requested a replan".to_string()
        } else {
            issues.join("; ")
        };
        let retained_ids = replan_retained_ids(&graph, task_id);
        let retained: Vec<TaskNode> = graph
            .nodes
            .iter()
            .filter(|node| retained_ids.contains(&node.id))
            .cloned()
            .collect();

        let pack = self.context_pack(&graph, &format!("{}\n{}", graph.goal, reason))?;
        let record = self.planner.run(
            self.completion,
            &PlannerPrompt {
                goal: &graph.goal,
                pack: &pack,
                max_tasks: self.cfg.max_tasks_per_plan,
                replan_reason: Some(&reason),
                retained: &retained,
            },
            &retained_ids,
        );
        // A fallback replan would restart the whole goal next to the retained work.
        let tasks = if record.fallback {
            Vec::new()
        } else {
            record.tasks
        };

        let (graph, outcome) = self.step(
            graph,
            &GraphEvent::Replanned {
                task_id: task_id.to_string(),
                summary: record.summary,
                tasks,
            },
        )?;
        let (message, status, dropped, added) = match &outcome {
            Outcome::Replanned { dropped, added } => (
                format!("replanned: dropped {}, added {added}", dropped.len()),
                EventStatus::Ok,
                dropped.clone(),
                *added,
            ),
            _ => (
                "replan produced no new tasks".to_string(),
                EventStatus::Warning,
                Vec::new(),
                0,
            ),
        };
        info!(task_id, added, "replan merged");
        self.record(
            RunLedgerEvent::new("plan.replanned", &graph.run_id, Actor::Planner, message)
                .task(task_id)
                .status(status)
                .data(json!({
                    "failed_task_id": task_id,
                    "issues": issues,
                    "dropped": dropped,
                    "added": added,
                    "replans": graph.replans,
                    "fallback": record.fallback,
                })),
        )?;
        Ok(graph)
    }

    fn finish(&self, mut graph: TaskGraph) -> Result<RunResult> {
        for (task_id, waiting_on) in stranded_nodes(&graph) {
            (graph, _) = self.step(
                graph,
                &GraphEvent::Stranded {
                    task_id: task_id.clone(),
                    waiting_on: waiting_on.clone(),
                },
            )?;
            self.record(
                RunLedgerEvent::new(
                    "task.stranded",
                    &graph.run_id,
                    Actor::System,
                    "dependencies cannot complete",
                )
                .task(task_id)
                .status(EventStatus::Warning)
                .data(json!({ "waiting_on": waiting_on })),
            )?;
        }
        let status = terminal_status(&graph);
        self.close(graph, status, None)
    }

    fn close(&self, graph: TaskGraph, status: GraphStatus, note: Option<&str>) -> Result<RunResult> {
        let mut summary = render_summary(&graph);
        if let Some(note) = note {
            summary.push_str("\n\n");
            summary.push_str(note);
        }
        let (graph, _) = self.step(
            graph,
            &GraphEvent::Finished {
                status,
                summary: summary.clone(),
            },
        )?;
        info!(run_id = %graph.run_id, status = status.as_str(), "run finished");
        self.record(
            RunLedgerEvent::new(
                "run.finished",
                &graph.run_id,
                Actor::System,
                format!("run finished {}", status.as_str()),
            )
            .status(if status == GraphStatus::Done {
                EventStatus::Ok
            } else {
                EventStatus::Warning
            })
            .data(json!({
                "status": status.as_str(),
                "nodes": graph.nodes.len(),
                "replans": graph.replans,
            })),
        )?;
        Ok(RunResult { summary, graph })
    }

    /// Apply one transition and persist the result.
    fn step(&self, graph: TaskGraph, event: &GraphEvent) -> Result<(TaskGraph, Outcome)> {
        let (graph, outcome) = transition::apply(graph, event, &self.cfg, &now_rfc3339())
            .map_err(|err| anyhow!(err))
            .context("apply graph transition")?;
        let violations = validate_invariants(&graph, &self.cfg);
        if !violations.is_empty() {
            warn!(?violations, "graph invariants violated");
        }
        save_graph(&self.paths.graph(), &graph)?;
        Ok((graph, outcome))
    }

    fn beat(&self) -> Result<()> {
        match self.heartbeat {
            Some(heartbeat) => heartbeat().context("run heartbeat"),
            None => Ok(()),
        }
    }

    fn context_pack(&self, graph: &TaskGraph, query: &str) -> Result<ContextPack> {
        build_context_pack(self.paths, Some(graph), query, &self.cfg.context)
    }

    fn record(&self, event: RunLedgerEvent) -> Result<()> {
        self.ledger
            .append(&event)
            .with_context(|| format!("append {} to run ledger", event.event))
    }
}

fn find_node(graph: &TaskGraph, task_id: &str) -> Result<TaskNode> {
    graph
        .node(task_id)
        .cloned()
        .ok_or_else(|| anyhow!("node '{task_id}' not found"))
}

fn new_run_id() -> String {
    format!(
        "run-{}-{:08x}",
        Utc::now().format("%Y%m%dT%H%M%SZ"),
        rand::random::<u32>()
    )
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Progressed => "progressed",
        Outcome::NodeDone => "done",
        Outcome::RetryScheduled { .. } => "retry",
        Outcome::NodeFailed => "failed",
        Outcome::NodeBlocked => "blocked",
        Outcome::ReplanRequested { .. } => "replan",
        Outcome::ReplanRefused => "replan_refused",
        Outcome::Replanned { .. } => "replanned",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PolicyConfig;
    use crate::graph::NodeStatus;
    use crate::test_support::{
        Role, ScriptedCompletion, ScriptedShell, TestWorkspace, critic_json, exec_json,
    };

    #[test]
    fn empty_goal_is_rejected_before_anything_is_written() {
        let workspace = TestWorkspace::new();
        let completion = ScriptedCompletion::new();
        let shell = ScriptedShell::exiting(0);
        let engine = Engine::new(&workspace.paths, &completion, &shell, 10_000);
        assert!(engine.run_goal("   ").is_err());
        assert!(!workspace.paths.graph().exists());
    }

    #[test]
    fn single_task_run_finishes_done_and_persists() {
        let workspace = TestWorkspace::new();
        let completion = ScriptedCompletion::new()
            .planner(r#"{"summary":"one","tasks":[{"id":"task-a","title":"Do it"}]}"#)
            .executor(exec_json("task-a", "done", "did it"))
            .critic(critic_json("task-a", "pass", &[]));
        let shell = ScriptedShell::exiting(0);
        let engine = Engine::new(&workspace.paths, &completion, &shell, 10_000);

        let result = engine.run_goal("do it").expect("run");
        assert_eq!(result.status(), GraphStatus::Done);
        assert_eq!(result.summary, "Completed:\n- Do it: did it");

        let saved = load_graph(&workspace.paths.graph())
            .expect("load")
            .expect("snapshot");
        assert_eq!(saved, result.graph);

        let events: Vec<String> = RunLedger::new(workspace.paths.ledger())
            .events()
            .expect("events")
            .into_iter()
            .map(|event| event.event)
            .collect();
        assert_eq!(
            events,
            vec![
                "run.started",
                "plan.created",
                "task.executed",
                "task.criticized",
                "run.finished"
            ]
        );
    }

    #[test]
    fn governor_blocks_external_mutation_without_calling_the_executor() {
        let workspace = TestWorkspace::new();
        let completion = ScriptedCompletion::new().planner(
            r#"{"tasks":[{"id":"task-push","title":"Push release","side_effect":"external_mutation"}]}"#,
        );
        let shell = ScriptedShell::exiting(0);
        let engine = Engine::new(&workspace.paths, &completion, &shell, 10_000);

        let result = engine.run_goal("ship it").expect("run");
        assert_eq!(result.status(), GraphStatus::Blocked);
        let node = result.graph.node("task-push").expect("node");
        assert_eq!(node.status, NodeStatus::Blocked);
        assert_eq!(node.first_issue(), Some(POLICY_DENIED_ISSUE));
        assert_eq!(completion.calls(Role::Executor), 0);
    }

    #[test]
    fn allowed_external_mutation_is_dispatched() {
        let workspace = TestWorkspace::with_runtime(&AutonomousRuntimeConfig {
            policy: PolicyConfig {
                allow_external_mutation: true,
            },
            ..AutonomousRuntimeConfig::default()
        });
        let completion = ScriptedCompletion::new()
            .planner(
                r#"{"tasks":[{"id":"task-push","title":"Push release","side_effect":"external_mutation"}]}"#,
            )
            .executor(exec_json("task-push", "done", "pushed"))
            .critic(critic_json("task-push", "pass", &[]));
        let shell = ScriptedShell::exiting(0);
        let engine = Engine::new(&workspace.paths, &completion, &shell, 10_000);

        let result = engine.run_goal("ship it").expect("run");
        assert_eq!(result.status(), GraphStatus::Done);
    }

    #[test]
    fn installed_dependency_retries_the_node() {
        let workspace = TestWorkspace::new();
        let completion = ScriptedCompletion::new()
            .planner(r#"{"tasks":[{"id":"task-a","title":"Lint"}]}"#)
            .executor(
                r#"{"task_id":"task-a","status":"failed","summary":"no linter","missing_dependency":{"name":"ruff","install_command":"pip install ruff"}}"#,
            )
            .executor(exec_json("task-a", "done", "linted"))
            .critic(critic_json("task-a", "pass", &[]));
        let shell = ScriptedShell::exiting(0);
        let engine = Engine::new(&workspace.paths, &completion, &shell, 10_000);

        let result = engine.run_goal("lint the code").expect("run");
        assert_eq!(result.status(), GraphStatus::Done);
        assert_eq!(shell.commands(), vec!["pip install ruff"]);
        assert_eq!(result.graph.node("task-a").expect("node").retries, 1);
        assert_eq!(completion.calls(Role::Critic), 1);
    }
}
