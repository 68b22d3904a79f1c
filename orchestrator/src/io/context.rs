//! Context pack builder: bounded, ranked snippets of durable memory.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::relevance::rank_lines;
use crate::core::types::{ContextCaps, ContextPack, MAX_ACTIVE_GOALS};
use crate::graph::{NodeStatus, TaskGraph};
use crate::io::ledger::RunLedger;
use crate::io::memory::{read_open_goals, read_procedures, read_recent_facts};
use crate::io::paths::WorkspacePaths;

/// Build a context pack for `goal`.
///
/// Reads the stores without modifying them. Blockers come from `graph` rather
/// than a store so the model sees the live state of the current run.
#[instrument(skip_all, fields(goal_len = goal.len()))]
pub fn build_context_pack(
    paths: &WorkspacePaths,
    graph: Option<&TaskGraph>,
    goal: &str,
    caps: &ContextCaps,
) -> Result<ContextPack> {
    let mut active_goals = read_open_goals(&paths.goals())?;
    active_goals.truncate(MAX_ACTIVE_GOALS);

    let relevant_facts = read_recent_facts(&paths.learnings(), caps.max_relevant_facts)?;

    let ledger_lines = RunLedger::new(paths.ledger()).lines()?;
    let ledger_refs: Vec<&str> = ledger_lines.iter().map(String::as_str).collect();
    let related_episodes = rank_lines(goal, &ledger_refs, caps.max_related_episodes)
        .into_iter()
        .map(str::to_string)
        .collect();

    let applicable_procedures = read_procedures(&paths.procedures())?
        .procedures
        .iter()
        .take(caps.max_applicable_procedures)
        .map(|procedure| procedure.snippet())
        .collect();

    let open_blockers = graph
        .map(|graph| {
            graph
                .nodes_with_status(NodeStatus::Blocked)
                .take(caps.max_open_blockers)
                .map(|node| match node.first_issue() {
                    Some(issue) => format!("{}: {}", node.id, issue),
                    None => node.id.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let pack = ContextPack {
        active_goals,
        relevant_facts,
        related_episodes,
        applicable_procedures,
        open_blockers,
    };
    debug!(
        goals = pack.active_goals.len(),
        facts = pack.relevant_facts.len(),
        episodes = pack.related_episodes.len(),
        procedures = pack.applicable_procedures.len(),
        blockers = pack.open_blockers.len(),
        "built context pack"
    );
    Ok(pack)
}
