//! Runtime limits loaded from `.orchestrator/state/runtime.json`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::types::AutonomousRuntimeConfig;
use crate::io::files::{read_optional, write_atomic};

/// Load runtime limits, falling back to defaults.
///
/// A missing file means "use defaults". An unreadable or malformed file is a
/// caller configuration problem: it is logged and the defaults apply.
pub fn load_runtime_config(path: &Path) -> AutonomousRuntimeConfig {
    let contents = match read_optional(path) {
        Ok(Some(contents)) => contents,
        Ok(None) => {
            debug!(path = %path.display(), "runtime config missing, using defaults");
            return AutonomousRuntimeConfig::default();
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "unreadable runtime config, using defaults");
            return AutonomousRuntimeConfig::default();
        }
    };
    match serde_json::from_str::<AutonomousRuntimeConfig>(&contents) {
        Ok(cfg) => cfg.normalized(),
        Err(err) => {
            warn!(path = %path.display(), err = %err, "malformed runtime config, using defaults");
            AutonomousRuntimeConfig::default()
        }
    }
}

pub fn write_runtime_config(path: &Path, cfg: &AutonomousRuntimeConfig) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(cfg).context("serialize runtime config")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_and_malformed_files_use_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("runtime.json");
        assert_eq!(load_runtime_config(&path), AutonomousRuntimeConfig::default());

        fs::write(&path, "{not json").expect("write");
        assert_eq!(load_runtime_config(&path), AutonomousRuntimeConfig::default());
    }

    #[test]
    fn written_config_is_loaded_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state").join("runtime.json");
        let cfg = AutonomousRuntimeConfig {
            retry_budget_per_node: 1,
            ..AutonomousRuntimeConfig::default()
        };
        write_runtime_config(&path, &cfg).expect("write");
        assert_eq!(load_runtime_config(&path), cfg);
    }
}
