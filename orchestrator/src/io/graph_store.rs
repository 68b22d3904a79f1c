//! Graph snapshot load/save with schema validation.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use serde_json::Value;
use tracing::debug;

use crate::graph::TaskGraph;
use crate::io::files::{read_optional, write_atomic};

const TASK_GRAPH_SCHEMA: &str = include_str!("../../schemas/task_graph.schema.json");

static SCHEMA: LazyLock<Result<Validator, String>> = LazyLock::new(|| {
    let value: Value = serde_json::from_str(TASK_GRAPH_SCHEMA)
        .map_err(|err| format!("parse task graph schema: {err}"))?;
    validator_for(&value).map_err(|err| format!("invalid task graph schema: {err}"))
});

/// Load the snapshot, or `None` when no run has been started in this workspace.
pub fn load_graph(path: &Path) -> Result<Option<TaskGraph>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse graph {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate graph {}", path.display()))?;
    let graph: TaskGraph = serde_json::from_value(value)
        .with_context(|| format!("deserialize graph {}", path.display()))?;
    Ok(Some(graph))
}

/// Overwrite the snapshot atomically.
pub fn save_graph(path: &Path, graph: &TaskGraph) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(graph).context("serialize graph")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    debug!(
        run_id = %graph.run_id,
        status = graph.status.as_str(),
        nodes = graph.nodes.len(),
        "saved graph snapshot"
    );
    Ok(())
}

fn validate_schema(value: &Value) -> Result<()> {
    let compiled = SCHEMA.as_ref().map_err(|err| anyhow!("{err}"))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "graph schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
