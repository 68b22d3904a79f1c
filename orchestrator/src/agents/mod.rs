//! Agent wrappers: render a prompt, call the completion service, validate.
//!
//! Agents never fail. Prompt rendering and completion errors are logged and
//! the empty completion is validated instead, which yields the fallback record.

use anyhow::Result;
use tracing::warn;

use crate::io::completion::CompletionService;

pub mod critic;
pub mod executor;
pub mod planner;

/// Call the completion service, mapping any failure to an empty completion.
pub(crate) fn complete_or_empty<C: CompletionService + ?Sized>(
    completion: &C,
    role: &'static str,
    prompt: Result<String>,
) -> String {
    let prompt = match prompt {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(role, err = %format!("{err:#}"), "prompt rendering failed");
            return String::new();
        }
    };
    match completion.complete(&prompt) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(role, err = %format!("{err:#}"), "completion failed, using fallback");
            String::new()
        }
    }
}
