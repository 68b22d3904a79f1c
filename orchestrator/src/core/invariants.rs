//! Semantic invariants not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};

use crate::core::types::AutonomousRuntimeConfig;
use crate::graph::TaskGraph;

/// Check semantic invariants of a graph snapshot:
/// - No duplicate ids
/// - Every `depends_on` entry resolves to a node in the same graph
/// - No self-references and no cycles
/// - `retries <= retry_budget_per_node`
/// - `replans <= replan_budget_per_run`
pub fn validate_invariants(graph: &TaskGraph, cfg: &AutonomousRuntimeConfig) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(format!("duplicate id '{}'", node.id));
        }
    }

    for node in &graph.nodes {
        for dep in &node.depends_on {
            if dep == &node.id {
                errors.push(format!("{}: depends on itself", node.id));
            } else if !seen.contains(dep.as_str()) {
                errors.push(format!("{}: unknown dependency '{}'", node.id, dep));
            }
        }
        if node.retries > cfg.retry_budget_per_node {
            errors.push(format!(
                "{}: retries {} exceeds retry budget {}",
                node.id, node.retries, cfg.retry_budget_per_node
            ));
        }
    }

    if graph.replans > cfg.replan_budget_per_run {
        errors.push(format!(
            "replans {} exceeds replan budget {}",
            graph.replans, cfg.replan_budget_per_run
        ));
    }

    if let Some(id) = first_cycle_member(graph) {
        errors.push(format!("dependency cycle through '{id}'"));
    }

    errors
}

fn first_cycle_member(graph: &TaskGraph) -> Option<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Visited,
    }

    fn visit<'a>(
        id: &'a str,
        edges: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> Option<String> {
        match marks.get(id) {
            Some(Mark::Visited) => return None,
            Some(Mark::Visiting) => return Some(id.to_string()),
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        for dep in edges.get(id).into_iter().flatten() {
            if let Some(found) = visit(dep, edges, marks) {
                return Some(found);
            }
        }
        marks.insert(id, Mark::Visited);
        None
    }

    // Duplicate ids share one vertex, so their edges are merged.
    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for node in &graph.nodes {
        edges.entry(node.id.as_str()).or_default().extend(
            node.depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| *dep != node.id),
        );
    }
    let mut marks = HashMap::new();
    graph
        .nodes
        .iter()
        .find_map(|node| visit(node.id.as_str(), &edges, &mut marks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{graph_with, node_with_deps};

    #[test]
    fn well_formed_graph_has_no_errors() {
        let graph = graph_with(vec![
            node_with_deps("task-a", &[]),
            node_with_deps("task-b", &["task-a"]),
        ]);
        assert!(validate_invariants(&graph, &AutonomousRuntimeConfig::default()).is_empty());
    }

    #[test]
    fn reports_duplicates_dangling_edges_and_cycles() {
        let graph = graph_with(vec![
            node_with_deps("task-a", &["task-b"]),
            node_with_deps("task-b", &["task-a", "task-x"]),
            node_with_deps("task-a", &[]),
        ]);
        let errors = validate_invariants(&graph, &AutonomousRuntimeConfig::default());
        assert!(errors.iter().any(|e| e.contains("duplicate id 'task-a'")));
        assert!(errors.iter().any(|e| e.contains("unknown dependency 'task-x'")));
        assert!(errors.iter().any(|e| e.contains("dependency cycle")));
    }

    #[test]
    fn cycle_through_a_duplicated_id_is_detected() {
        let graph = graph_with(vec![
            node_with_deps("task-a", &["task-b"]),
            node_with_deps("task-b", &["task-a"]),
            node_with_deps("task-a", &[]),
        ]);
        let errors = validate_invariants(&graph, &AutonomousRuntimeConfig::default());
        assert!(errors.iter().any(|e| e.starts_with("dependency cycle through")));
    }

    #[test]
    fn reports_retries_over_budget() {
        let mut graph = graph_with(vec![node_with_deps("task-a", &[])]);
        graph.nodes[0].retries = 3;
        let errors = validate_invariants(&graph, &AutonomousRuntimeConfig::default());
        assert_eq!(errors, vec!["task-a: retries 3 exceeds retry budget 2"]);
    }
}
