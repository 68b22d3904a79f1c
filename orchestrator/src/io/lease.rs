//! Durable worker lease (`.orchestrator/state/worker.lease.json`).
//!
//! Guards the background worker across processes sharing a workspace. The
//! check-then-write itself is not atomic across processes.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::io::files::{read_optional, write_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLease {
    pub owner: String,
    pub expires_at: String,
}

impl WorkerLease {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.expires_at) {
            Ok(expires_at) => expires_at.with_timezone(&Utc) > now,
            Err(err) => {
                warn!(expires_at = %self.expires_at, err = %err, "unparseable lease expiry, treating as expired");
                false
            }
        }
    }
}

/// Owner id for this process.
pub fn process_owner_id() -> String {
    format!("pid-{}-{:08x}", std::process::id(), rand::random::<u32>())
}

/// Take the lease for `owner` unless another owner holds a live one.
pub fn try_acquire(path: &Path, owner: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
    if let Some(current) = load_lease(path)?
        && current.owner != owner
        && current.is_live(now)
    {
        debug!(holder = %current.owner, "lease held by another worker");
        return Ok(false);
    }
    let lease = WorkerLease {
        owner: owner.to_string(),
        expires_at: (now + ttl).to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    let mut buf = serde_json::to_string_pretty(&lease).context("serialize lease")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    Ok(true)
}

/// Extend a lease `owner` already holds.
///
/// Returns `false` when another owner has taken it over in the meantime.
pub fn renew(path: &Path, owner: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool> {
    let renewed = try_acquire(path, owner, ttl, now)?;
    if renewed {
        debug!(owner, "lease renewed");
    }
    Ok(renewed)
}

/// Whether the lease file currently names `owner`.
pub fn holds(path: &Path, owner: &str) -> Result<bool> {
    Ok(load_lease(path)?.is_some_and(|lease| lease.owner == owner))
}

/// Drop the lease if `owner` still holds it.
pub fn release(path: &Path, owner: &str) -> Result<()> {
    match load_lease(path)? {
        Some(current) if current.owner == owner => std::fs::remove_file(path)
            .with_context(|| format!("remove lease {}", path.display())),
        _ => Ok(()),
    }
}

fn load_lease(path: &Path) -> Result<Option<WorkerLease>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };
    match serde_json::from_str(&contents) {
        Ok(lease) => Ok(Some(lease)),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "malformed lease, ignoring");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts)
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn live_lease_blocks_other_owners_until_expiry() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("worker.lease.json");
        let ttl = Duration::minutes(10);

        assert!(try_acquire(&path, "a", ttl, at("2026-01-01T00:00:00Z")).expect("acquire"));
        assert!(!try_acquire(&path, "b", ttl, at("2026-01-01T00:05:00Z")).expect("acquire"));
        assert!(try_acquire(&path, "a", ttl, at("2026-01-01T00:05:00Z")).expect("reacquire"));
        assert!(try_acquire(&path, "b", ttl, at("2026-01-01T00:16:00Z")).expect("expired"));
    }

    #[test]
    fn renew_extends_own_lease_but_not_a_taken_one() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("worker.lease.json");
        let ttl = Duration::minutes(10);

        try_acquire(&path, "a", ttl, at("2026-01-01T00:00:00Z")).expect("acquire");
        assert!(renew(&path, "a", ttl, at("2026-01-01T00:08:00Z")).expect("renew"));
        // Still live at 00:15 because of the renewal.
        assert!(!try_acquire(&path, "b", ttl, at("2026-01-01T00:15:00Z")).expect("acquire"));

        assert!(try_acquire(&path, "b", ttl, at("2026-01-01T00:30:00Z")).expect("expired"));
        assert!(!renew(&path, "a", ttl, at("2026-01-01T00:31:00Z")).expect("renew lost"));
        assert!(holds(&path, "b").expect("holds"));
        assert!(!holds(&path, "a").expect("holds"));
    }

    #[test]
    fn release_only_removes_own_lease() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("worker.lease.json");
        let now = at("2026-01-01T00:00:00Z");
        try_acquire(&path, "a", Duration::minutes(1), now).expect("acquire");

        release(&path, "b").expect("release other");
        assert!(path.exists());
        release(&path, "a").expect("release own");
        assert!(!path.exists());
        release(&path, "a").expect("release missing");
    }
}
