//! Workspace layout under `.orchestrator/`.

use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".orchestrator";

/// Resolved locations of every durable store for one workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.base_dir().join("memory")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir().join("state")
    }

    /// Prefix that user-space package managers install into.
    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir().join("tools")
    }

    pub fn goals(&self) -> PathBuf {
        self.memory_dir().join("GOALS.md")
    }

    pub fn learnings(&self) -> PathBuf {
        self.memory_dir().join("LEARNINGS.md")
    }

    pub fn procedures(&self) -> PathBuf {
        self.memory_dir().join("PROCEDURES.md")
    }

    pub fn history(&self) -> PathBuf {
        self.memory_dir().join("HISTORY.md")
    }

    pub fn dependency_requests(&self) -> PathBuf {
        self.memory_dir().join("DEPENDENCY_REQUESTS.md")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.memory_dir().join("archive")
    }

    pub fn graph(&self) -> PathBuf {
        self.state_dir().join("graph.json")
    }

    pub fn queue(&self) -> PathBuf {
        self.state_dir().join("queue.json")
    }

    pub fn worker_lease(&self) -> PathBuf {
        self.state_dir().join("worker.lease.json")
    }

    pub fn outbox(&self) -> PathBuf {
        self.state_dir().join("outbox.jsonl")
    }

    pub fn runtime_config(&self) -> PathBuf {
        self.state_dir().join("runtime.json")
    }

    pub fn service_config(&self) -> PathBuf {
        self.state_dir().join("service.toml")
    }

    pub fn ledger(&self) -> PathBuf {
        self.base_dir().join("ledger").join("runs.jsonl")
    }
}
