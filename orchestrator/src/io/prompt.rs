//! Prompt builder for planner, executor, and critic calls.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use tracing::debug;

use crate::core::types::{ContextPack, ExecutorRecord};
use crate::graph::TaskNode;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const EXECUTOR_TEMPLATE: &str = include_str!("prompts/executor.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");
const CONTEXT_TEMPLATE: &str = include_str!("prompts/context.md");

/// Droppable sections, lowest priority first.
const DROP_ORDER: [&str; 4] = ["episodes", "procedures", "facts", "goals"];

/// Inputs for a planner prompt.
#[derive(Debug, Clone)]
pub struct PlannerPrompt<'a> {
    pub goal: &'a str,
    pub pack: &'a ContextPack,
    pub max_tasks: usize,
    /// Why the previous plan is being replaced.
    pub replan_reason: Option<&'a str>,
    /// Nodes kept across a replan.
    pub retained: &'a [TaskNode],
}

/// Inputs for an executor prompt.
#[derive(Debug, Clone)]
pub struct ExecutorPrompt<'a> {
    pub goal: &'a str,
    pub task: &'a TaskNode,
    pub pack: &'a ContextPack,
}

/// Inputs for a critic prompt.
#[derive(Debug, Clone)]
pub struct CriticPrompt<'a> {
    pub goal: &'a str,
    pub task: &'a TaskNode,
    pub execution: &'a ExecutorRecord,
    /// Outcome of a dependency install attempted during this execution.
    pub install_note: Option<&'a str>,
    pub pack: &'a ContextPack,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("context", CONTEXT_TEMPLATE)
            .expect("context template should be valid");
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        env.add_template("executor", EXECUTOR_TEMPLATE)
            .expect("executor template should be valid");
        env.add_template("critic", CRITIC_TEMPLATE)
            .expect("critic template should be valid");
        Self { env }
    }

    fn render_planner(&self, input: &PlannerPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("planner")?;
        Ok(template.render(context! {
            goal => input.goal.trim(),
            pack => input.pack,
            max_tasks => input.max_tasks,
            replan_reason => input.replan_reason.map(str::trim).filter(|s| !s.is_empty()),
            retained => input.retained,
        })?)
    }

    fn render_executor(&self, input: &ExecutorPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("executor")?;
        Ok(template.render(context! {
            goal => input.goal.trim(),
            task => input.task,
            pack => input.pack,
        })?)
    }

    fn render_critic(&self, input: &CriticPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("critic")?;
        Ok(template.render(context! {
            goal => input.goal.trim(),
            task => input.task,
            execution => input.execution,
            install_note => input.install_note.map(str::trim).filter(|s| !s.is_empty()),
            pack => input.pack,
        })?)
    }
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "episodes").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    content: String,
}

/// Parse sections from rendered template output using HTML comment markers.
///
/// Markers follow format: `<!-- section:KEY required|droppable -->`
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex should be valid")
    });

    let markers: Vec<(usize, usize, String, bool)> = SECTION_RE
        .captures_iter(rendered)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (i, (_, content_start, key, required)) in markers.iter().enumerate() {
        let end = markers
            .get(i + 1)
            .map(|(next_start, ..)| *next_start)
            .unwrap_or(rendered.len());
        let content = rendered[*content_start..end].trim().to_string();
        if !content.is_empty() || *required {
            sections.push(ParsedSection {
                key: key.clone(),
                required: *required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections in [`DROP_ORDER`] until under budget, then truncate the last section.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let other_len: usize = sections
        .iter()
        .take(sections.len().saturating_sub(1))
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut()
        && last.content.len() > allowed
    {
        let before_len = last.content.len();
        let keep = floor_char_boundary(&last.content, allowed.saturating_sub(12));
        last.content.truncate(keep);
        last.content.push_str("\n[truncated]");
        debug!(
            section = last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping lower-priority context first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_planner(&self, input: &PlannerPrompt<'_>) -> Result<String> {
        let rendered = PromptEngine::new().render_planner(input)?;
        Ok(self.fit(&rendered))
    }

    pub fn build_executor(&self, input: &ExecutorPrompt<'_>) -> Result<String> {
        let rendered = PromptEngine::new().render_executor(input)?;
        Ok(self.fit(&rendered))
    }

    pub fn build_critic(&self, input: &CriticPrompt<'_>) -> Result<String> {
        let rendered = PromptEngine::new().render_critic(input)?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }
}
