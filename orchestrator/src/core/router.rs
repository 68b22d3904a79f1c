//! Inline vs background routing of incoming requests.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Requests longer than this are always treated as background jobs.
pub const LONG_REQUEST_CHARS: usize = 280;

const MULTI_STEP_MARKERS: &[&str] = &["then", "after that", "step by step", "afterwards"];
const JOB_VERBS: &[&str] = &[
    "research", "build", "deploy", "install", "set up", "migrate", "refactor",
];

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+[.)]\s+\S").expect("valid numbered-line regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    Inline,
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub mode: RouteMode,
    pub reason: String,
}

/// Decide whether `text` should run inline or be queued for the background worker.
pub fn route_request(text: &str) -> RouteDecision {
    let trimmed = text.trim();
    if trimmed.chars().count() > LONG_REQUEST_CHARS {
        return background(format!("long request (> {LONG_REQUEST_CHARS} chars)"));
    }
    if NUMBERED_LINE.find_iter(trimmed).count() >= 2 {
        return background("numbered multi-step list".to_string());
    }
    let lowered = trimmed.to_lowercase();
    if let Some(marker) = MULTI_STEP_MARKERS
        .iter()
        .find(|marker| contains_phrase(&lowered, marker))
    {
        return background(format!("multi-step marker '{marker}'"));
    }
    if let Some(verb) = JOB_VERBS.iter().find(|verb| contains_phrase(&lowered, verb)) {
        return background(format!("job verb '{verb}'"));
    }
    RouteDecision {
        mode: RouteMode::Inline,
        reason: "short single-step request".to_string(),
    }
}

fn background(reason: String) -> RouteDecision {
    RouteDecision {
        mode: RouteMode::Background,
        reason,
    }
}

/// True if `phrase` occurs in `text` on word boundaries.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let before_ok = text[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = text[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_question_is_inline() {
        let decision = route_request("what time is it in Tokyo?");
        assert_eq!(decision.mode, RouteMode::Inline);
    }

    #[test]
    fn long_request_is_background() {
        let decision = route_request(&"word ".repeat(80));
        assert_eq!(decision.mode, RouteMode::Background);
        assert!(decision.reason.starts_with("long request"));
    }

    #[test]
    fn multi_step_marker_is_background() {
        let decision = route_request("download the file, then summarize it");
        assert_eq!(decision.mode, RouteMode::Background);
        assert_eq!(decision.reason, "multi-step marker 'then'");
    }

    #[test]
    fn numbered_list_is_background() {
        let decision = route_request("1. fetch data\n2. plot it");
        assert_eq!(decision.reason, "numbered multi-step list");
    }

    #[test]
    fn job_verbs_match_whole_words_only() {
        assert_eq!(
            route_request("please deploy the site").reason,
            "job verb 'deploy'"
        );
        assert_eq!(route_request("who is the rebuilder?").mode, RouteMode::Inline);
        assert_eq!(route_request("what is authentic?").mode, RouteMode::Inline);
    }
}
