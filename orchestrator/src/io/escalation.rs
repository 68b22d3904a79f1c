//! Dependency install escalator.
//!
//! When the executor reports a missing tool, either run its install command in
//! the restricted shell (user-space installs only) or record a human-reviewable
//! request in `DEPENDENCY_REQUESTS.md`. Privileged commands are never run.

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{info, instrument, warn};

use crate::core::types::MissingDependency;
use crate::graph::TaskNode;
use crate::io::files::append;
use crate::io::paths::WorkspacePaths;
use crate::io::shell::{ShellRunner, workspace_install_env};

// Matched against the lower-cased command text.
static PRIVILEGED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(^|[\s;&|(])(sudo|su|doas|pkexec)(\s|$)",
        r"(^|[\s;&|(])(apt|apt-get|aptitude|yum|dnf|pacman|zypper|apk|brew|snap|port|emerge)\s+(-\S+\s+)*(install|add|-s)\b",
        r"(^|[\s;&|(])(dpkg|rpm)\s+(-\S*\s+)*-[a-z]*[iu]",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("privileged pattern should be valid"))
    .collect()
});

/// Result of handling one missing-dependency hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed { command: String },
    /// A request entry was appended; `detail` becomes the node's blocking issue.
    Escalated { detail: String },
    Failed { command: String, output: String },
}

/// Why a hint cannot be installed automatically, if it cannot.
pub fn escalation_reason(hint: &MissingDependency) -> Option<&'static str> {
    match hint.install_command.as_deref().map(str::trim) {
        None | Some("") => Some("no install command provided"),
        Some(_) if hint.requires_root => Some("install requires root"),
        Some(command) if is_privileged_command(command) => Some("install command needs elevated privileges"),
        Some(_) => None,
    }
}

/// True if `command` invokes a privilege-elevation prefix or a system package manager.
pub fn is_privileged_command(command: &str) -> bool {
    let lowered = command.to_lowercase();
    PRIVILEGED_PATTERNS
        .iter()
        .any(|pattern| pattern.is_match(&lowered))
}

pub struct InstallEscalator<'a, S: ShellRunner + ?Sized> {
    paths: &'a WorkspacePaths,
    shell: &'a S,
}

impl<'a, S: ShellRunner + ?Sized> InstallEscalator<'a, S> {
    pub fn new(paths: &'a WorkspacePaths, shell: &'a S) -> Self {
        Self { paths, shell }
    }

    /// Install or escalate. Errors only when the request log cannot be written.
    #[instrument(skip_all, fields(task_id = %node.id, dependency = %hint.name))]
    pub fn handle(
        &self,
        node: &TaskNode,
        hint: &MissingDependency,
        now: &str,
    ) -> Result<InstallOutcome> {
        if let Some(reason) = escalation_reason(hint) {
            self.record_request(node, hint, reason, now)?;
            warn!(reason, "dependency escalated");
            return Ok(InstallOutcome::Escalated {
                detail: format!(
                    "missing dependency '{}' needs manual install ({reason}); request recorded in DEPENDENCY_REQUESTS.md",
                    hint.name
                ),
            });
        }

        // escalation_reason returned None, so a command is present
        let command = hint
            .install_command
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let env = workspace_install_env(&self.paths.tools_dir(), std::env::var_os("PATH"));
        match self.shell.run(&command, self.paths.root(), &env) {
            Ok(output) if output.success() => {
                info!(command, "dependency installed");
                Ok(InstallOutcome::Installed { command })
            }
            Ok(output) => {
                warn!(command, exit_code = ?output.exit_code, "dependency install failed");
                Ok(InstallOutcome::Failed {
                    command,
                    output: output.output,
                })
            }
            Err(err) => {
                warn!(command, err = %err, "dependency install could not run");
                Ok(InstallOutcome::Failed {
                    command,
                    output: format!("{err:#}"),
                })
            }
        }
    }

    fn record_request(
        &self,
        node: &TaskNode,
        hint: &MissingDependency,
        reason: &str,
        now: &str,
    ) -> Result<()> {
        append(
            &self.paths.dependency_requests(),
            &render_request(node, hint, reason, now),
        )
    }
}

/// Markdown entry for one escalation. `resolved_at` is left empty for a human to fill.
pub fn render_request(node: &TaskNode, hint: &MissingDependency, reason: &str, now: &str) -> String {
    let suggested = hint
        .install_command
        .as_deref()
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("# install {} so it is on PATH, then resolve this request", hint.name));
    let evidence = hint
        .evidence
        .as_deref()
        .map(|e| e.trim().replace('\n', " "))
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "none reported".to_string());

    format!(
        "\n## Dependency request: {name}\n\
         - status: open\n\
         - task: {id} ({title})\n\
         - reason: {reason}\n\
         - evidence: {evidence}\n\
         - opened_at: {now}\n\
         - resolved_at:\n\
         - suggested:\n\n\
         ```sh\n{suggested}\n```\n",
        name = hint.name,
        id = node.id,
        title = node.title,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::shell::ShellOutput;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    struct FakeShell {
        exit_code: Option<i32>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeShell {
        fn new(exit_code: Option<i32>) -> Self {
            Self {
                exit_code,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl ShellRunner for FakeShell {
        fn run(&self, command: &str, _: &Path, _: &[(String, String)]) -> Result<ShellOutput> {
            self.calls.lock().expect("lock").push(command.to_string());
            Ok(ShellOutput {
                exit_code: self.exit_code,
                output: "fake output".to_string(),
            })
        }
    }

    fn hint(command: Option<&str>, requires_root: bool) -> MissingDependency {
        MissingDependency {
            name: "ffmpeg".to_string(),
            install_command: command.map(str::to_string),
            requires_root,
            evidence: Some("ffmpeg: command not found".to_string()),
        }
    }

    #[test]
    fn privileged_commands_are_detected() {
        for cmd in [
            "sudo apt install ffmpeg",
            "apt-get install -y ffmpeg",
            "brew install ffmpeg",
            "cd /tmp && doas make install",
            "dpkg -i pkg.deb",
            "rpm -Uvh pkg.rpm",
            "pacman -S ffmpeg",
        ] {
            assert!(is_privileged_command(cmd), "{cmd}");
        }
        for cmd in [
            "pip install --user yt-dlp",
            "npm install -g prettier",
            "cargo install ripgrep",
            "pseudo-tool --help",
        ] {
            assert!(!is_privileged_command(cmd), "{cmd}");
        }
    }

    #[test]
    fn root_hint_is_escalated_without_running_anything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(temp.path());
        let shell = FakeShell::new(Some(0));
        let node = TaskNode::new("task-c", "Convert video");

        let outcome = InstallEscalator::new(&paths, &shell)
            .handle(&node, &hint(Some("sudo apt install ffmpeg"), true), "2026-01-01T00:00:00Z")
            .expect("handle");

        assert!(matches!(outcome, InstallOutcome::Escalated { .. }));
        assert!(shell.calls.lock().expect("lock").is_empty());
        let log = fs::read_to_string(paths.dependency_requests()).expect("requests");
        assert_eq!(log.matches("## Dependency request: ffmpeg").count(), 1);
        assert!(log.contains("- task: task-c (Convert video)"));
        assert!(log.contains("- opened_at: 2026-01-01T00:00:00Z"));
        assert!(log.contains("- resolved_at:\n"));
        assert!(log.contains("sudo apt install ffmpeg"));
    }

    #[test]
    fn missing_command_is_escalated() {
        assert_eq!(
            escalation_reason(&hint(None, false)),
            Some("no install command provided")
        );
        assert_eq!(escalation_reason(&hint(Some("  "), false)), Some("no install command provided"));
    }

    #[test]
    fn user_space_command_runs_and_reports_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = WorkspacePaths::new(temp.path());
        let node = TaskNode::new("task-a", "a");

        let ok = FakeShell::new(Some(0));
        let outcome = InstallEscalator::new(&paths, &ok)
            .handle(&node, &hint(Some("pip install --user ffmpeg-python"), false), "now")
            .expect("handle");
        assert_eq!(
            outcome,
            InstallOutcome::Installed {
                command: "pip install --user ffmpeg-python".to_string()
            }
        );

        let failing = FakeShell::new(Some(1));
        let outcome = InstallEscalator::new(&paths, &failing)
            .handle(&node, &hint(Some("pip install nope"), false), "now")
            .expect("handle");
        assert!(matches!(outcome, InstallOutcome::Failed { ref output, .. } if output == "fake output"));
        assert!(!paths.dependency_requests().exists());
    }
}
