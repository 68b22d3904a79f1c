use serde::{Deserialize, Serialize};

/// Lifecycle of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
    Failed,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::InProgress => "in_progress",
            NodeStatus::Done => "done",
            NodeStatus::Blocked => "blocked",
            NodeStatus::Failed => "failed",
        }
    }

    /// Blocked and failed nodes both need attention before the run can be `done`.
    pub fn is_unsuccessful(self) -> bool {
        matches!(self, NodeStatus::Blocked | NodeStatus::Failed)
    }
}

/// Phase of the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphStatus {
    Planning,
    Executing,
    Criticizing,
    Replanning,
    Blocked,
    Done,
}

impl GraphStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GraphStatus::Planning => "planning",
            GraphStatus::Executing => "executing",
            GraphStatus::Criticizing => "criticizing",
            GraphStatus::Replanning => "replanning",
            GraphStatus::Blocked => "blocked",
            GraphStatus::Done => "done",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, GraphStatus::Blocked | GraphStatus::Done)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    #[default]
    Medium,
    High,
}

impl Risk {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Risk::Low),
            "medium" => Some(Risk::Medium),
            "high" => Some(Risk::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }
}

/// What a node is allowed to touch when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    #[default]
    Read,
    WriteLocal,
    ExternalMutation,
}

impl SideEffect {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "read" => Some(SideEffect::Read),
            "write_local" => Some(SideEffect::WriteLocal),
            "external_mutation" => Some(SideEffect::ExternalMutation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SideEffect::Read => "read",
            SideEffect::WriteLocal => "write_local",
            SideEffect::ExternalMutation => "external_mutation",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskNode {
    pub id: String,
    pub title: String,
    pub status: NodeStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub risk: Risk,
    #[serde(default)]
    pub side_effect: SideEffect,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub critic_issues: Option<Vec<String>>,
}

impl TaskNode {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: NodeStatus::Pending,
            depends_on: Vec::new(),
            acceptance_criteria: Vec::new(),
            retries: 0,
            risk: Risk::default(),
            side_effect: SideEffect::default(),
            result_summary: None,
            critic_issues: None,
        }
    }

    /// First critic issue, used when rendering blocked/failed nodes.
    pub fn first_issue(&self) -> Option<&str> {
        self.critic_issues
            .as_ref()
            .and_then(|issues| issues.first())
            .map(String::as_str)
    }
}

/// Task graph for one run (`.orchestrator/state/graph.json`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskGraph {
    pub run_id: String,
    pub goal: String,
    pub status: GraphStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub nodes: Vec<TaskNode>,
    #[serde(default)]
    pub current_task_id: Option<String>,
    /// Replans consumed so far in this run.
    #[serde(default)]
    pub replans: u32,
    pub created_at: String,
    pub updated_at: String,
}

impl TaskGraph {
    /// Empty graph in `planning`, the state persisted when a run starts.
    pub fn new(run_id: impl Into<String>, goal: impl Into<String>, now: &str) -> Self {
        Self {
            run_id: run_id.into(),
            goal: goal.into(),
            status: GraphStatus::Planning,
            summary: String::new(),
            nodes: Vec::new(),
            current_task_id: None,
            replans: 0,
            created_at: now.to_string(),
            updated_at: now.to_string(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        self.nodes.iter_mut().find(|node| node.id == id)
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> impl Iterator<Item = &TaskNode> {
        self.nodes.iter().filter(move |node| node.status == status)
    }
}
