//! Markdown memory stores under `.orchestrator/memory/`.
//!
//! Missing files are empty stores. Parsing is line-oriented and lenient: lines
//! that do not match a store's shape are ignored (or kept verbatim when the
//! store is rewritten).

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::io::files::{read_optional, write_atomic};

static OPEN_GOAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+\[ \]\s+(.+?)\s*$").expect("valid goal regex"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+(.+?)\s*$").expect("valid bullet regex"));
static SCORE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*<!--\s*score:\s*(-?\d+)\s*-->\s*$").expect("valid score regex")
});

const PROCEDURE_HEADING: &str = "## ";

/// Unchecked checklist items (`- [ ] text`), in file order.
pub fn read_open_goals(path: &Path) -> Result<Vec<String>> {
    Ok(read_optional(path)?
        .unwrap_or_default()
        .lines()
        .filter_map(|line| OPEN_GOAL.captures(line))
        .map(|caps| caps[1].to_string())
        .collect())
}

/// The last `limit` bullet lines of the learnings store, in file order.
pub fn read_recent_facts(path: &Path, limit: usize) -> Result<Vec<String>> {
    let contents = read_optional(path)?.unwrap_or_default();
    let facts: Vec<String> = contents
        .lines()
        .filter_map(|line| BULLET.captures(line))
        .map(|caps| caps[1].to_string())
        .collect();
    let skip = facts.len().saturating_sub(limit);
    Ok(facts.into_iter().skip(skip).collect())
}

/// A `## ` section of the procedures store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    pub heading: String,
    /// Section lines after the heading, without the score marker.
    pub body: Vec<String>,
    pub score: Option<i64>,
}

impl Procedure {
    /// Heading plus the non-empty body lines joined into one snippet.
    pub fn snippet(&self) -> String {
        let body: Vec<&str> = self
            .body
            .iter()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .collect();
        if body.is_empty() {
            self.heading.clone()
        } else {
            format!("{}: {}", self.heading, body.join(" "))
        }
    }
}

/// Lines before the first heading plus the parsed sections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcedureStore {
    pub preamble: Vec<String>,
    pub procedures: Vec<Procedure>,
}

pub fn read_procedures(path: &Path) -> Result<ProcedureStore> {
    Ok(parse_procedures(&read_optional(path)?.unwrap_or_default()))
}

pub fn parse_procedures(contents: &str) -> ProcedureStore {
    let mut store = ProcedureStore::default();
    for line in contents.lines() {
        if let Some(heading) = line.strip_prefix(PROCEDURE_HEADING) {
            store.procedures.push(Procedure {
                heading: heading.trim().to_string(),
                body: Vec::new(),
                score: None,
            });
            continue;
        }
        match store.procedures.last_mut() {
            Some(current) => {
                if let Some(caps) = SCORE_MARKER.captures(line) {
                    current.score = caps[1].parse().ok();
                } else {
                    current.body.push(line.to_string());
                }
            }
            None => store.preamble.push(line.to_string()),
        }
    }
    store
}

pub fn render_procedures(store: &ProcedureStore) -> String {
    let mut out = String::new();
    for line in &store.preamble {
        out.push_str(line);
        out.push('\n');
    }
    for procedure in &store.procedures {
        out.push_str(PROCEDURE_HEADING);
        out.push_str(&procedure.heading);
        out.push('\n');
        if let Some(score) = procedure.score {
            out.push_str(&format!("<!-- score: {score} -->\n"));
        }
        let mut body = procedure.body.as_slice();
        while let Some((last, rest)) = body.split_last() {
            if !last.trim().is_empty() {
                break;
            }
            body = rest;
        }
        for line in body {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

pub fn write_procedures(path: &Path, store: &ProcedureStore) -> Result<()> {
    write_atomic(path, &render_procedures(store))
}

/// All lines of the history store, in file order.
pub fn read_history(path: &Path) -> Result<Vec<String>> {
    Ok(read_optional(path)?
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect())
}
