//! Loop bounds for a single run.

use crate::core::types::AutonomousRuntimeConfig;

/// Minimum number of loop iterations a run is allowed, regardless of plan size.
pub const MIN_ITERATIONS: usize = 4;

/// Total loop iterations allowed for a graph with `node_count` nodes.
///
/// Every node may be executed once, retried up to the retry budget, and be the
/// trigger of a replan, with one extra iteration of slack for selection.
pub fn iteration_budget(node_count: usize, cfg: &AutonomousRuntimeConfig) -> usize {
    let per_node = cfg.retry_budget_per_node as usize + cfg.replan_budget_per_run as usize + 2;
    MIN_ITERATIONS.max(node_count.saturating_mul(per_node))
}
