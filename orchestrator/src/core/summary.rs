//! Human-readable run summaries.

use crate::graph::{NodeStatus, TaskGraph};

pub const NOTHING_COMPLETED: &str = "Nothing was completed.";

/// Render completed, blocked, and failed nodes as sections; empty sections are omitted.
pub fn render_summary(graph: &TaskGraph) -> String {
    let mut sections = Vec::new();

    let completed: Vec<String> = graph
        .nodes_with_status(NodeStatus::Done)
        .map(|node| match node.result_summary.as_deref() {
            Some(summary) if !summary.trim().is_empty() => {
                format!("- {}: {}", node.title, summary.trim())
            }
            _ => format!("- {}", node.title),
        })
        .collect();
    if !completed.is_empty() {
        sections.push(format!("Completed:\n{}", completed.join("\n")));
    }

    for (status, heading) in [(NodeStatus::Blocked, "Blocked"), (NodeStatus::Failed, "Failed")] {
        let lines: Vec<String> = graph
            .nodes_with_status(status)
            .map(|node| match node.first_issue() {
                Some(issue) => format!("- {}: {}", node.title, issue),
                None => format!("- {}", node.title),
            })
            .collect();
        if !lines.is_empty() {
            sections.push(format!("{heading}:\n{}", lines.join("\n")));
        }
    }

    if sections.is_empty() {
        NOTHING_COMPLETED.to_string()
    } else {
        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{graph_with, node_with_deps};

    #[test]
    fn sections_follow_completed_blocked_failed_order() {
        let mut graph = graph_with(vec![
            node_with_deps("task-a", &[]),
            node_with_deps("task-b", &[]),
            node_with_deps("task-c", &[]),
        ]);
        graph.nodes[0].status = NodeStatus::Failed;
        graph.nodes[0].critic_issues = Some(vec!["tests fail".to_string()]);
        graph.nodes[1].status = NodeStatus::Done;
        graph.nodes[1].result_summary = Some("wrote it".to_string());
        graph.nodes[2].status = NodeStatus::Blocked;

        assert_eq!(
            render_summary(&graph),
            "Completed:\n- task-b title: wrote it\n\nBlocked:\n- task-c title\n\nFailed:\n- task-a title: tests fail"
        );
    }

    #[test]
    fn empty_outcome_uses_fixed_message() {
        let graph = graph_with(vec![node_with_deps("task-a", &[])]);
        assert_eq!(render_summary(&graph), NOTHING_COMPLETED);
    }
}
