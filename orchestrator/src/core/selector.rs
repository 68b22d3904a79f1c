//! Deterministic selection logic for the task graph.

use crate::graph::{GraphStatus, NodeStatus, TaskGraph, TaskNode};

/// Find the first `pending` node, in declaration order, whose dependencies are all `done`.
pub fn next_runnable(graph: &TaskGraph) -> Option<&TaskNode> {
    graph
        .nodes
        .iter()
        .find(|node| node.status == NodeStatus::Pending && dependencies_done(graph, node))
}

fn dependencies_done(graph: &TaskGraph, node: &TaskNode) -> bool {
    node.depends_on.iter().all(|dep| {
        graph
            .node(dep)
            .is_some_and(|dep| dep.status == NodeStatus::Done)
    })
}

/// Pending nodes that can never run because a dependency ended blocked or failed.
///
/// Only meaningful once `next_runnable` returns `None`. Returns `(id, unfinished deps)`.
pub fn stranded_nodes(graph: &TaskGraph) -> Vec<(String, Vec<String>)> {
    graph
        .nodes_with_status(NodeStatus::Pending)
        .map(|node| {
            let waiting = node
                .depends_on
                .iter()
                .filter(|dep| {
                    graph
                        .node(dep)
                        .is_none_or(|dep| dep.status != NodeStatus::Done)
                })
                .cloned()
                .collect();
            (node.id.clone(), waiting)
        })
        .collect()
}

/// Terminal status once nothing is runnable: `done` only if no node is blocked or failed.
pub fn terminal_status(graph: &TaskGraph) -> GraphStatus {
    if graph
        .nodes
        .iter()
        .any(|node| node.status != NodeStatus::Done)
    {
        GraphStatus::Blocked
    } else {
        GraphStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{graph_with, node_with_deps};

    #[test]
    fn picks_first_pending_in_declaration_order() {
        let graph = graph_with(vec![
            node_with_deps("task-b", &["task-a"]),
            node_with_deps("task-a", &[]),
            node_with_deps("task-c", &[]),
        ]);
        assert_eq!(next_runnable(&graph).expect("runnable").id, "task-a");
    }

    #[test]
    fn waits_for_dependencies_to_be_done() {
        let mut graph = graph_with(vec![
            node_with_deps("task-a", &[]),
            node_with_deps("task-b", &["task-a"]),
        ]);
        graph.nodes[0].status = NodeStatus::InProgress;
        assert!(next_runnable(&graph).is_none());

        graph.nodes[0].status = NodeStatus::Done;
        assert_eq!(next_runnable(&graph).expect("runnable").id, "task-b");
    }

    #[test]
    fn stranded_nodes_report_unfinished_dependencies() {
        let mut graph = graph_with(vec![
            node_with_deps("task-a", &[]),
            node_with_deps("task-b", &[]),
            node_with_deps("task-c", &["task-a", "task-b"]),
        ]);
        graph.nodes[0].status = NodeStatus::Failed;
        graph.nodes[1].status = NodeStatus::Done;
        assert!(next_runnable(&graph).is_none());
        assert_eq!(
            stranded_nodes(&graph),
            vec![("task-c".to_string(), vec!["task-a".to_string()])]
        );
    }

    #[test]
    fn terminal_status_requires_every_node_done() {
        let mut graph = graph_with(vec![node_with_deps("task-a", &[])]);
        graph.nodes[0].status = NodeStatus::Done;
        assert_eq!(terminal_status(&graph), GraphStatus::Done);

        graph.nodes[0].status = NodeStatus::Blocked;
        assert_eq!(terminal_status(&graph), GraphStatus::Blocked);
    }
}
