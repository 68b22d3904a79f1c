//! Delivery of background results to requesters.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::io::files::append;
use crate::io::ledger::now_rfc3339;

/// Sends a message to a requester. The chat transport implements this.
pub trait Notifier: Send + Sync {
    fn notify(&self, requester: &str, message: &str) -> Result<()>;
}

/// File-backed notifier: appends one JSON line per message to the outbox.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    path: PathBuf,
}

#[derive(Serialize)]
struct OutboxLine<'a> {
    requester: &'a str,
    message: &'a str,
    ts: String,
}

impl OutboxNotifier {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Notifier for OutboxNotifier {
    fn notify(&self, requester: &str, message: &str) -> Result<()> {
        let mut line = serde_json::to_string(&OutboxLine {
            requester,
            message,
            ts: now_rfc3339(),
        })
        .context("serialize outbox line")?;
        line.push('\n');
        append(&self.path, &line)?;
        info!(requester, "queued reply in outbox");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::fs;

    #[test]
    fn messages_are_appended_as_json_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("outbox.jsonl");
        let notifier = OutboxNotifier::new(&path);
        notifier.notify("chat-1", "first").expect("notify");
        notifier.notify("chat-2", "second\nline").expect("notify");

        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["requester"], "chat-2");
        assert_eq!(lines[1]["message"], "second\nline");
    }
}
