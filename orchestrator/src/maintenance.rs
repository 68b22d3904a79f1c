//! Periodic housekeeping of the memory stores.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use crate::core::relevance::{keywords, score_line};
use crate::io::config::MaintenanceConfig;
use crate::io::files::{append, write_atomic};
use crate::io::ledger::{Actor, EventStatus, RunLedger, RunLedgerEvent};
use crate::io::memory::{read_history, read_procedures, write_procedures};
use crate::io::paths::WorkspacePaths;

/// Ledger `run_id` used for housekeeping events.
pub const MAINTENANCE_RUN_ID: &str = "maintenance";

static HISTORY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+\[([^\]]+)\]").expect("valid history line regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub archived_lines: usize,
    /// Archive file names that received lines, e.g. `history-2026-01.md`.
    pub archive_files: Vec<String>,
    pub procedures_scored: usize,
}

/// Run one maintenance pass, logging instead of returning errors.
pub fn maintenance_cycle(paths: &WorkspacePaths, cfg: &MaintenanceConfig) {
    match run_maintenance(paths, cfg, Utc::now()) {
        Ok(report) => info!(
            archived = report.archived_lines,
            procedures = report.procedures_scored,
            "maintenance completed"
        ),
        Err(err) => error!(err = %format!("{err:#}"), "maintenance failed"),
    }
}

/// Archive old history and re-score procedures.
#[instrument(skip_all, fields(retention_days = cfg.history_retention_days))]
pub fn run_maintenance(
    paths: &WorkspacePaths,
    cfg: &MaintenanceConfig,
    now: DateTime<Utc>,
) -> Result<MaintenanceReport> {
    let (archived_lines, archive_files) = archive_history(paths, cfg.history_retention_days, now)?;
    let procedures_scored = rescore_procedures(paths)?;
    let report = MaintenanceReport {
        archived_lines,
        archive_files,
        procedures_scored,
    };
    RunLedger::new(paths.ledger()).append(
        &RunLedgerEvent::new(
            "maintenance.completed",
            MAINTENANCE_RUN_ID,
            Actor::System,
            format!(
                "archived {} history line(s), scored {} procedure(s)",
                report.archived_lines, report.procedures_scored
            ),
        )
        .data(json!({
            "archived_lines": report.archived_lines,
            "archive_files": report.archive_files,
            "procedures_scored": report.procedures_scored,
        })),
    )?;
    Ok(report)
}

/// Move history lines older than the retention window into monthly archives.
///
/// Lines without a parseable timestamp stay in place.
fn archive_history(
    paths: &WorkspacePaths,
    retention_days: u32,
    now: DateTime<Utc>,
) -> Result<(usize, Vec<String>)> {
    // A window reaching past the earliest representable date keeps everything.
    let Some(cutoff) =
        Duration::try_days(i64::from(retention_days)).and_then(|window| now.checked_sub_signed(window))
    else {
        debug!(retention_days, "retention window exceeds the calendar; nothing to archive");
        return Ok((0, Vec::new()));
    };
    let history_path = paths.history();
    let lines = read_history(&history_path)?;

    let mut kept = Vec::new();
    let mut by_month: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in lines {
        match line_timestamp(&line) {
            Some(ts) if ts < cutoff => {
                by_month
                    .entry(ts.format("%Y-%m").to_string())
                    .or_default()
                    .push(line);
            }
            _ => kept.push(line),
        }
    }
    if by_month.is_empty() {
        return Ok((0, Vec::new()));
    }

    let archive_dir = paths.archive_dir();
    let mut archived = 0usize;
    let mut files = Vec::new();
    for (month, month_lines) in by_month {
        let name = format!("history-{month}.md");
        let mut buf = month_lines.join("\n");
        buf.push('\n');
        append(&archive_dir.join(&name), &buf)?;
        archived += month_lines.len();
        files.push(name);
    }

    let mut remaining = kept.join("\n");
    if !remaining.is_empty() {
        remaining.push('\n');
    }
    write_atomic(&history_path, &remaining)?;
    info!(archived, files = files.len(), "archived history");
    Ok((archived, files))
}

fn line_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let caps = HISTORY_LINE.captures(line)?;
    DateTime::parse_from_rfc3339(caps[1].trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Score each procedure by the successful ledger events that mention its heading.
fn rescore_procedures(paths: &WorkspacePaths) -> Result<usize> {
    let procedures_path = paths.procedures();
    let mut store = read_procedures(&procedures_path)?;
    if store.procedures.is_empty() {
        return Ok(0);
    }

    let ledger = RunLedger::new(paths.ledger());
    let ok_lines: Vec<String> = ledger
        .lines()?
        .into_iter()
        .filter(|line| {
            serde_json::from_str::<RunLedgerEvent>(line)
                .is_ok_and(|event| event.status == EventStatus::Ok)
        })
        .collect();

    for procedure in &mut store.procedures {
        let heading_keywords = keywords(&procedure.heading);
        let score = if heading_keywords.is_empty() {
            0
        } else {
            ok_lines
                .iter()
                .filter(|line| score_line(line, &heading_keywords) > 0)
                .count()
        };
        procedure.score = Some(i64::try_from(score).unwrap_or(i64::MAX));
    }
    store
        .procedures
        .sort_by(|a, b| b.score.unwrap_or_default().cmp(&a.score.unwrap_or_default()));
    write_procedures(&procedures_path, &store)?;
    Ok(store.procedures.len())
}
