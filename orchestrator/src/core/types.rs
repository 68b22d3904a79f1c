//! Shared deterministic types for orchestration core logic.
//!
//! Records here are the *validated* shapes of model output: every field is
//! present and within bounds. Raw model JSON never reaches the engine.

use serde::{Deserialize, Serialize};

use crate::graph::{Risk, SideEffect};

/// Maximum number of acceptance criteria kept per task.
pub const MAX_ACCEPTANCE_CRITERIA: usize = 6;

/// Maximum number of open goals placed in a context pack.
pub const MAX_ACTIVE_GOALS: usize = 6;

/// One task proposed by the planner, after sanitization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    pub id: String,
    pub title: String,
    pub depends_on: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub risk: Risk,
    pub side_effect: SideEffect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannerRecord {
    pub summary: String,
    pub tasks: Vec<PlannedTask>,
    /// True when the model output was unusable and the fallback task was substituted.
    pub fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Done,
    Failed,
}

impl ExecStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::Done => "done",
            ExecStatus::Failed => "failed",
        }
    }
}

/// Executor-reported hint that a tool is missing from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub name: String,
    pub install_command: Option<String>,
    pub requires_root: bool,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutorRecord {
    pub status: ExecStatus,
    pub summary: String,
    pub missing_dependency: Option<MissingDependency>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Retry,
    Replan,
    Block,
    /// A verdict string outside the protocol; the engine blocks on it.
    Other(String),
}

impl Verdict {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pass" => Verdict::Pass,
            "retry" => Verdict::Retry,
            "replan" => Verdict::Replan,
            "block" => Verdict::Block,
            other => Verdict::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Retry => "retry",
            Verdict::Replan => "replan",
            Verdict::Block => "block",
            Verdict::Other(raw) => raw.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CriticRecord {
    pub verdict: Verdict,
    pub issues: Vec<String>,
    pub reason: Option<String>,
}

/// Bounded slice of durable memory shown to a model call. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContextPack {
    pub active_goals: Vec<String>,
    pub relevant_facts: Vec<String>,
    pub related_episodes: Vec<String>,
    pub applicable_procedures: Vec<String>,
    pub open_blockers: Vec<String>,
}

/// Runtime limits for one run (`.orchestrator/state/runtime.json`).
///
/// Every field has a default, so a partial document only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AutonomousRuntimeConfig {
    pub max_tasks_per_plan: usize,
    pub retry_budget_per_node: u32,
    pub replan_budget_per_run: u32,
    pub context: ContextCaps,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextCaps {
    pub max_relevant_facts: usize,
    pub max_related_episodes: usize,
    pub max_applicable_procedures: usize,
    pub max_open_blockers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub allow_external_mutation: bool,
}

impl Default for AutonomousRuntimeConfig {
    fn default() -> Self {
        Self {
            max_tasks_per_plan: 6,
            retry_budget_per_node: 2,
            replan_budget_per_run: 1,
            context: ContextCaps::default(),
            policy: PolicyConfig::default(),
        }
    }
}

impl Default for ContextCaps {
    fn default() -> Self {
        Self {
            max_relevant_facts: 8,
            max_related_episodes: 5,
            max_applicable_procedures: 3,
            max_open_blockers: 5,
        }
    }
}

impl AutonomousRuntimeConfig {
    /// Clamp values that would make a run meaningless.
    pub fn normalized(mut self) -> Self {
        if self.max_tasks_per_plan == 0 {
            self.max_tasks_per_plan = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_parse_is_case_insensitive_and_keeps_unknowns() {
        assert_eq!(Verdict::parse(" PASS "), Verdict::Pass);
        assert_eq!(Verdict::parse("Replan"), Verdict::Replan);
        assert_eq!(
            Verdict::parse("escalate"),
            Verdict::Other("escalate".to_string())
        );
    }

    #[test]
    fn partial_runtime_config_keeps_defaults() {
        let cfg: AutonomousRuntimeConfig =
            serde_json::from_str(r#"{"retry_budget_per_node": 5, "context": {"max_open_blockers": 1}}"#)
                .expect("parse");
        assert_eq!(cfg.retry_budget_per_node, 5);
        assert_eq!(cfg.max_tasks_per_plan, 6);
        assert_eq!(cfg.context.max_open_blockers, 1);
        assert_eq!(cfg.context.max_relevant_facts, 8);
        assert!(!cfg.policy.allow_external_mutation);
    }

    #[test]
    fn normalized_clamps_zero_task_cap() {
        let cfg = AutonomousRuntimeConfig {
            max_tasks_per_plan: 0,
            ..AutonomousRuntimeConfig::default()
        }
        .normalized();
        assert_eq!(cfg.max_tasks_per_plan, 1);
    }
}
