//! Planner agent: goal + context pack -> validated task list.

use tracing::{info, instrument};

use crate::core::types::PlannerRecord;
use crate::core::validator::validate_planner_output;
use crate::io::completion::CompletionService;
use crate::io::prompt::{PlannerPrompt, PromptBuilder};

use super::complete_or_empty;

#[derive(Debug, Clone)]
pub struct PlannerAgent {
    prompts: PromptBuilder,
}

impl PlannerAgent {
    pub fn new(prompt_budget_bytes: usize) -> Self {
        Self {
            prompts: PromptBuilder::new(prompt_budget_bytes),
        }
    }

    /// Plan `input.goal`. `known_ids` are ids that new tasks may depend on but not reuse.
    #[instrument(skip_all, fields(replan = input.replan_reason.is_some()))]
    pub fn run<C: CompletionService + ?Sized>(
        &self,
        completion: &C,
        input: &PlannerPrompt<'_>,
        known_ids: &[String],
    ) -> PlannerRecord {
        let raw = complete_or_empty(completion, "planner", self.prompts.build_planner(input));
        let record = validate_planner_output(&raw, input.goal, input.max_tasks, known_ids);
        info!(
            tasks = record.tasks.len(),
            fallback = record.fallback,
            "planner output validated"
        );
        record
    }
}
