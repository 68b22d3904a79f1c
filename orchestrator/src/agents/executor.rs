//! Executor agent: one task -> validated execution record.

use tracing::{info, instrument};

use crate::core::types::ExecutorRecord;
use crate::core::validator::validate_executor_output;
use crate::io::completion::CompletionService;
use crate::io::prompt::{ExecutorPrompt, PromptBuilder};

use super::complete_or_empty;

#[derive(Debug, Clone)]
pub struct ExecutorAgent {
    prompts: PromptBuilder,
}

impl ExecutorAgent {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    #[instrument(skip_all, fields(task_id = %input.task.id))]
    pub fn run<C: CompletionService + ?Sized>(
        &self,
        completion: &C,
        input: &ExecutorPrompt<'_>,
    ) -> ExecutorRecord {
        let raw = complete_or_empty(completion, "executor", self.prompts.build_executor(input));
        let record = validate_executor_output(&raw, &input.task.id);
        info!(
            status = record.status.as_str(),
            missing_dependency = record.missing_dependency.is_some(),
            "executor output validated"
        );
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ContextPack, ExecStatus};
    use crate::graph::TaskNode;
    use crate::test_support::{ScriptedCompletion, exec_json};

    #[test]
    fn reports_done_and_missing_dependency() {
        let pack = ContextPack::default();
        let task = TaskNode::new("task-a", "A");
        let input = ExecutorPrompt {
            goal: "goal",
            task: &task,
            pack: &pack,
        };
        let completion = ScriptedCompletion::new()
            .executor(exec_json("task-a", "done", "ok"))
            .executor(
                r#"{"task_id":"task-a","status":"failed","summary":"no ffmpeg","missing_dependency":{"name":"ffmpeg","install_command":"pip install ffmpeg"}}"#,
            );
        let agent = ExecutorAgent::new(10_000);

        let first = agent.run(&completion, &input);
        assert_eq!(first.status, ExecStatus::Done);
        assert_eq!(first.summary, "ok");

        let second = agent.run(&completion, &input);
        assert_eq!(second.status, ExecStatus::Failed);
        assert_eq!(
            second.missing_dependency.map(|dep| dep.name),
            Some("ffmpeg".to_string())
        );

        let third = agent.run(&completion, &input);
        assert_eq!(third.status, ExecStatus::Failed);
    }
}
