//! Critic agent: execution result -> validated verdict.

use tracing::{info, instrument};

use crate::core::types::CriticRecord;
use crate::core::validator::validate_critic_output;
use crate::io::completion::CompletionService;
use crate::io::prompt::{CriticPrompt, PromptBuilder};

use super::complete_or_empty;

#[derive(Debug, Clone)]
pub struct CriticAgent {
    prompts: PromptBuilder,
}

impl CriticAgent {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    #[instrument(skip_all, fields(task_id = %input.task.id))]
    pub fn run<C: CompletionService + ?Sized>(
        &self,
        completion: &C,
        input: &CriticPrompt<'_>,
    ) -> CriticRecord {
        let raw = complete_or_empty(completion, "critic", self.prompts.build_critic(input));
        let record = validate_critic_output(&raw, &input.task.id);
        info!(verdict = record.verdict.as_str(), issues = record.issues.len(), "critic output validated");
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ContextPack, ExecStatus, ExecutorRecord, Verdict};
    use crate::graph::TaskNode;
    use crate::test_support::{ScriptedCompletion, critic_json};

    #[test]
    fn verdicts_are_validated_and_garbage_becomes_retry() {
        let pack = ContextPack::default();
        let task = TaskNode::new("task-a", "A");
        let execution = ExecutorRecord {
            status: ExecStatus::Done,
            summary: "ok".to_string(),
            missing_dependency: None,
        };
        let input = CriticPrompt {
            goal: "goal",
            task: &task,
            execution: &execution,
            install_note: None,
            pack: &pack,
        };
        let completion = ScriptedCompletion::new()
            .critic(format!("Sure! {}", critic_json("task-a", "pass", &[])))
            .critic("I think it looks fine");
        let agent = CriticAgent::new(10_000);

        assert_eq!(agent.run(&completion, &input).verdict, Verdict::Pass);
        let garbage = agent.run(&completion, &input);
        assert_eq!(garbage.verdict, Verdict::Retry);
        assert!(!garbage.issues.is_empty());
    }
}
