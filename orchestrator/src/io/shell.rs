//! Restricted shell used for user-space dependency installs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, instrument};

use crate::io::config::InstallConfig;
use crate::io::process::{ProcessLimits, run_bounded};

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub exit_code: Option<i32>,
    /// Stderr then stdout, trimmed, with truncation/timeout notices.
    pub output: String,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes a single command string in a working directory with a fixed environment.
pub trait ShellRunner: Send + Sync {
    fn run(&self, command: &str, workdir: &Path, env: &[(String, String)]) -> Result<ShellOutput>;
}

/// `sh -c` with a cleared environment: only the variables passed to `run` are set.
#[derive(Debug, Clone)]
pub struct RestrictedShell {
    timeout: Duration,
    output_limit_bytes: usize,
}

impl RestrictedShell {
    pub fn new(cfg: &InstallConfig) -> Self {
        Self {
            timeout: cfg.timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl ShellRunner for RestrictedShell {
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn run(&self, command: &str, workdir: &Path, env: &[(String, String)]) -> Result<ShellOutput> {
        info!(command, "running install command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let output = run_bounded(
            cmd,
            None,
            ProcessLimits {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
            },
        )?;
        Ok(ShellOutput {
            exit_code: if output.timed_out { None } else { output.exit_code },
            output: output.report("install"),
        })
    }
}

/// Environment that redirects user-space package managers into `tools_dir`.
///
/// `inherited_path` is appended after the workspace-local bin directories.
pub fn workspace_install_env(
    tools_dir: &Path,
    inherited_path: Option<OsString>,
) -> Vec<(String, String)> {
    let dir = |name: &str| -> PathBuf { tools_dir.join(name) };
    let show = |path: PathBuf| path.display().to_string();

    let local_bins = [
        dir("bin"),
        dir("python").join("bin"),
        dir("npm").join("bin"),
        dir("cargo").join("bin"),
        dir("gem").join("bin"),
    ];
    let mut path: Vec<String> = local_bins.into_iter().map(show).collect();
    path.push(
        inherited_path
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| FALLBACK_PATH.to_string()),
    );

    vec![
        ("PATH".to_string(), path.join(":")),
        ("HOME".to_string(), show(dir("home"))),
        ("LANG".to_string(), "C.UTF-8".to_string()),
        ("PYTHONUSERBASE".to_string(), show(dir("python"))),
        ("PIP_USER".to_string(), "1".to_string()),
        ("NPM_CONFIG_PREFIX".to_string(), show(dir("npm"))),
        ("CARGO_HOME".to_string(), show(dir("cargo"))),
        ("GOPATH".to_string(), show(dir("go"))),
        ("GOBIN".to_string(), show(dir("bin"))),
        ("GEM_HOME".to_string(), show(dir("gem"))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_points_package_managers_at_the_workspace() {
        let env = workspace_install_env(Path::new("/w/.orchestrator/tools"), None);
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .expect("key present")
        };
        assert_eq!(get("NPM_CONFIG_PREFIX"), "/w/.orchestrator/tools/npm");
        assert_eq!(get("CARGO_HOME"), "/w/.orchestrator/tools/cargo");
        assert!(get("PATH").starts_with("/w/.orchestrator/tools/bin:"));
        assert!(get("PATH").ends_with(FALLBACK_PATH));
    }

    #[test]
    fn restricted_shell_runs_in_workdir_with_only_given_env() {
        let temp = tempfile::tempdir().expect("tempdir");
        let shell = RestrictedShell::new(&InstallConfig::default());
        let env = vec![
            ("PATH".to_string(), FALLBACK_PATH.to_string()),
            ("MARKER".to_string(), "set".to_string()),
        ];
        let output = shell
            .run("pwd; echo \"$MARKER:${CARGO_HOME:-unset}\"", temp.path(), &env)
            .expect("run");
        assert!(output.success());
        assert!(output.output.contains("set:unset"));

        let failed = shell.run("exit 7", temp.path(), &env).expect("run");
        assert_eq!(failed.exit_code, Some(7));
    }
}
