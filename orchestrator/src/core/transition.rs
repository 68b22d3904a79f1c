//! Pure state transitions for the task graph.
//!
//! The engine performs I/O (model calls, installs, persistence) and feeds the
//! results back as [`GraphEvent`]s. [`apply`] turns `(graph, event)` into the
//! next graph plus an [`Outcome`] describing what happened to the node, so the
//! whole state machine can be exercised without touching the filesystem.

use std::collections::HashSet;

use crate::core::types::{AutonomousRuntimeConfig, CriticRecord, ExecStatus, PlannedTask, Verdict};
use crate::graph::{GraphStatus, NodeStatus, TaskGraph, TaskNode};

pub const REPLAN_BUDGET_EXHAUSTED: &str = "replan budget exhausted";
pub const INSTALL_RETRY_EXHAUSTED: &str = "dependency installed but retry budget exhausted";
pub const EXECUTOR_NOT_DONE: &str = "executor did not report completion";
pub const ITERATION_BUDGET_EXHAUSTED: &str = "iteration budget exhausted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// Initial plan: populate nodes as `pending` and start executing.
    Planned {
        summary: String,
        tasks: Vec<PlannedTask>,
    },
    Started {
        task_id: String,
    },
    /// Policy refused to dispatch the node.
    PolicyDenied {
        task_id: String,
        issue: String,
    },
    Executed {
        task_id: String,
    },
    DependencyInstalled {
        task_id: String,
    },
    DependencyEscalated {
        task_id: String,
        detail: String,
    },
    Criticized {
        task_id: String,
        exec_status: ExecStatus,
        exec_summary: String,
        critique: CriticRecord,
    },
    /// Replacement plan after a `replan` verdict was accepted.
    Replanned {
        task_id: String,
        summary: String,
        tasks: Vec<PlannedTask>,
    },
    /// A pending node whose dependencies can no longer complete.
    Stranded {
        task_id: String,
        waiting_on: Vec<String>,
    },
    /// A pending node the run stopped before reaching.
    Halted {
        task_id: String,
        issue: String,
    },
    /// Recovering a snapshot left behind by an interrupted process.
    Resumed,
    Finished {
        status: GraphStatus,
        summary: String,
    },
}

/// What a transition did, for ledger reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Progressed,
    NodeDone,
    RetryScheduled { retries: u32 },
    NodeFailed,
    NodeBlocked,
    ReplanRequested { replans: u32 },
    ReplanRefused,
    Replanned { dropped: Vec<String>, added: usize },
}

/// Apply `event` to `graph`.
///
/// Errors only on events that reference unknown nodes or nodes in the wrong
/// state; those indicate an engine bug, never bad model output.
pub fn apply(
    mut graph: TaskGraph,
    event: &GraphEvent,
    cfg: &AutonomousRuntimeConfig,
    now: &str,
) -> Result<(TaskGraph, Outcome), String> {
    let outcome = match event {
        GraphEvent::Planned { summary, tasks } => {
            graph.nodes = tasks.iter().map(node_from_plan).collect();
            graph.summary = summary.clone();
            graph.status = GraphStatus::Executing;
            graph.current_task_id = None;
            Outcome::Progressed
        }
        GraphEvent::Started { task_id } => {
            let node = node_mut(&mut graph, task_id)?;
            if node.status != NodeStatus::Pending {
                return Err(format!(
                    "cannot start '{}' in status {}",
                    task_id,
                    node.status.as_str()
                ));
            }
            node.status = NodeStatus::InProgress;
            graph.status = GraphStatus::Executing;
            graph.current_task_id = Some(task_id.clone());
            Outcome::Progressed
        }
        GraphEvent::PolicyDenied { task_id, issue } => {
            block(node_mut(&mut graph, task_id)?, vec![issue.clone()]);
            graph.current_task_id = None;
            Outcome::NodeBlocked
        }
        GraphEvent::Executed { task_id } => {
            node_mut(&mut graph, task_id)?;
            graph.status = GraphStatus::Criticizing;
            Outcome::Progressed
        }
        GraphEvent::DependencyInstalled { task_id } => {
            let node = node_mut(&mut graph, task_id)?;
            let outcome = if node.retries < cfg.retry_budget_per_node {
                node.retries += 1;
                node.status = NodeStatus::Pending;
                Outcome::RetryScheduled {
                    retries: node.retries,
                }
            } else {
                node.status = NodeStatus::Failed;
                node.critic_issues = Some(vec![INSTALL_RETRY_EXHAUSTED.to_string()]);
                Outcome::NodeFailed
            };
            graph.status = GraphStatus::Executing;
            graph.current_task_id = None;
            outcome
        }
        GraphEvent::DependencyEscalated { task_id, detail } => {
            block(node_mut(&mut graph, task_id)?, vec![detail.clone()]);
            graph.status = GraphStatus::Executing;
            graph.current_task_id = None;
            Outcome::NodeBlocked
        }
        GraphEvent::Criticized {
            task_id,
            exec_status,
            exec_summary,
            critique,
        } => apply_verdict(&mut graph, task_id, *exec_status, exec_summary, critique, cfg)?,
        GraphEvent::Replanned {
            task_id,
            summary,
            tasks,
        } => merge_replan(&mut graph, task_id, summary, tasks)?,
        GraphEvent::Stranded {
            task_id,
            waiting_on,
        } => {
            let issue = format!(
                "waiting on unfinished dependencies: {}",
                waiting_on.join(", ")
            );
            block(node_mut(&mut graph, task_id)?, vec![issue]);
            Outcome::NodeBlocked
        }
        GraphEvent::Halted { task_id, issue } => {
            let node = node_mut(&mut graph, task_id)?;
            if node.status != NodeStatus::Pending {
                return Err(format!(
                    "cannot halt '{}' in status {}",
                    task_id,
                    node.status.as_str()
                ));
            }
            block(node, vec![issue.clone()]);
            Outcome::NodeBlocked
        }
        GraphEvent::Resumed => {
            for node in &mut graph.nodes {
                if node.status == NodeStatus::InProgress {
                    node.status = NodeStatus::Pending;
                }
            }
            if matches!(
                graph.status,
                GraphStatus::Criticizing | GraphStatus::Replanning
            ) {
                graph.status = GraphStatus::Executing;
            }
            graph.current_task_id = None;
            Outcome::Progressed
        }
        GraphEvent::Finished { status, summary } => {
            graph.status = *status;
            graph.summary = summary.clone();
            graph.current_task_id = None;
            Outcome::Progressed
        }
    };
    graph.updated_at = now.to_string();
    Ok((graph, outcome))
}

fn apply_verdict(
    graph: &mut TaskGraph,
    task_id: &str,
    exec_status: ExecStatus,
    exec_summary: &str,
    critique: &CriticRecord,
    cfg: &AutonomousRuntimeConfig,
) -> Result<Outcome, String> {
    let replans = graph.replans;
    let node = node_mut(graph, task_id)?;
    let mut next_status = GraphStatus::Executing;

    let outcome = match &critique.verdict {
        Verdict::Pass if exec_status == ExecStatus::Done => {
            node.status = NodeStatus::Done;
            node.result_summary = Some(exec_summary.to_string());
            node.critic_issues = None;
            Outcome::NodeDone
        }
        Verdict::Pass => {
            let mut issues = vec![EXECUTOR_NOT_DONE.to_string()];
            issues.extend(critique.issues.iter().cloned());
            retry_or_fail(node, issues, cfg.retry_budget_per_node)
        }
        Verdict::Retry => retry_or_fail(
            node,
            issues_or(&critique.issues, "critic requested a retry"),
            cfg.retry_budget_per_node,
        ),
        Verdict::Replan if replans < cfg.replan_budget_per_run => {
            node.critic_issues = Some(issues_or(&critique.issues, "critic requested a replan"));
            next_status = GraphStatus::Replanning;
            Outcome::ReplanRequested {
                replans: replans + 1,
            }
        }
        Verdict::Replan => {
            block(node, issues_or(&critique.issues, REPLAN_BUDGET_EXHAUSTED));
            Outcome::ReplanRefused
        }
        Verdict::Block => {
            block(node, issues_or(&critique.issues, "critic blocked the task"));
            Outcome::NodeBlocked
        }
        Verdict::Other(raw) => {
            block(
                node,
                issues_or(&critique.issues, &format!("invalid critic verdict '{raw}'")),
            );
            Outcome::NodeBlocked
        }
    };

    if let Outcome::ReplanRequested { replans } = outcome {
        graph.replans = replans;
    }
    graph.status = next_status;
    if next_status != GraphStatus::Replanning {
        graph.current_task_id = None;
    }
    Ok(outcome)
}

fn retry_or_fail(node: &mut TaskNode, issues: Vec<String>, budget: u32) -> Outcome {
    node.critic_issues = Some(issues);
    if node.retries < budget {
        node.retries += 1;
        node.status = NodeStatus::Pending;
        Outcome::RetryScheduled {
            retries: node.retries,
        }
    } else {
        node.status = NodeStatus::Failed;
        Outcome::NodeFailed
    }
}

fn block(node: &mut TaskNode, issues: Vec<String>) {
    node.status = NodeStatus::Blocked;
    node.critic_issues = Some(issues);
}

fn issues_or(issues: &[String], default: &str) -> Vec<String> {
    if issues.is_empty() {
        vec![default.to_string()]
    } else {
        issues.to_vec()
    }
}

/// Ids of the triggering node and every node that transitively depends on it.
pub fn replan_dropped_ids(graph: &TaskGraph, trigger: &str) -> Vec<String> {
    let mut dropped: HashSet<&str> = HashSet::from([trigger]);
    loop {
        let before = dropped.len();
        for node in &graph.nodes {
            if node.status != NodeStatus::Done
                && node.depends_on.iter().any(|dep| dropped.contains(dep.as_str()))
            {
                dropped.insert(node.id.as_str());
            }
        }
        if dropped.len() == before {
            break;
        }
    }
    graph
        .nodes
        .iter()
        .filter(|node| dropped.contains(node.id.as_str()))
        .map(|node| node.id.clone())
        .collect()
}

/// Ids that survive a replan triggered by `trigger`, in declaration order.
pub fn replan_retained_ids(graph: &TaskGraph, trigger: &str) -> Vec<String> {
    let dropped = replan_dropped_ids(graph, trigger);
    graph
        .nodes
        .iter()
        .filter(|node| !dropped.contains(&node.id))
        .map(|node| node.id.clone())
        .collect()
}

fn merge_replan(
    graph: &mut TaskGraph,
    task_id: &str,
    summary: &str,
    tasks: &[PlannedTask],
) -> Result<Outcome, String> {
    if graph.status != GraphStatus::Replanning {
        return Err(format!(
            "replan for '{task_id}' while graph is {}",
            graph.status.as_str()
        ));
    }
    node_mut(graph, task_id)?;

    let dropped = replan_dropped_ids(graph, task_id);
    let mut known: HashSet<String> = graph
        .nodes
        .iter()
        .filter(|node| !dropped.contains(&node.id))
        .map(|node| node.id.clone())
        .collect();
    let fresh: Vec<&PlannedTask> = tasks
        .iter()
        .filter(|task| known.insert(task.id.clone()))
        .collect();

    // Nothing new to run: keep the trigger as a failure instead of losing its work.
    if fresh.is_empty() {
        let node = node_mut(graph, task_id)?;
        node.status = NodeStatus::Failed;
        if node.critic_issues.as_ref().is_none_or(Vec::is_empty) {
            node.critic_issues = Some(vec!["replan produced no new tasks".to_string()]);
        }
        graph.status = GraphStatus::Executing;
        graph.current_task_id = None;
        return Ok(Outcome::NodeFailed);
    }

    graph.nodes.retain(|node| !dropped.contains(&node.id));
    let mut added = 0usize;
    for task in fresh {
        let mut node = node_from_plan(task);
        node.depends_on.retain(|dep| known.contains(dep) && dep != &node.id);
        graph.nodes.push(node);
        added += 1;
    }

    if !summary.trim().is_empty() {
        graph.summary = summary.to_string();
    }
    graph.status = GraphStatus::Executing;
    graph.current_task_id = None;
    Ok(Outcome::Replanned { dropped, added })
}

fn node_from_plan(task: &PlannedTask) -> TaskNode {
    TaskNode {
        depends_on: task.depends_on.clone(),
        acceptance_criteria: task.acceptance_criteria.clone(),
        risk: task.risk,
        side_effect: task.side_effect,
        ..TaskNode::new(task.id.clone(), task.title.clone())
    }
}

fn node_mut<'a>(graph: &'a mut TaskGraph, task_id: &str) -> Result<&'a mut TaskNode, String> {
    graph
        .node_mut(task_id)
        .ok_or_else(|| format!("node '{task_id}' not found"))
}
