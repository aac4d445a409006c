//! Build and test checks run inside a workspace.
//!
//! Steps run in order and stop at the first failure. A failing report
//! carries only the failing step's output, which is what the agent needs
//! to fix it.

use std::fmt;
use tracing::{debug, info};

use crate::config::ValidationConfig;
use crate::detection::{ProjectKind, PROBE_COMMAND};
use crate::sandbox::{SandboxError, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckKind {
    /// Dependency installation.
    Install,
    /// Does the untouched base build?
    Setup,
    /// Do the agent's changes build and pass?
    Execute,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::Setup => "setup-check",
            Self::Execute => "execute-check",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CheckReport {
    pub passed: bool,
    pub output: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Validator {
    install: Vec<String>,
    setup: Vec<String>,
    execute: Vec<String>,
}

impl Validator {
    /// Steps for `kind`, with any configured override lists taking precedence.
    pub fn new(kind: ProjectKind, overrides: &ValidationConfig) -> Self {
        let pick = |configured: &Option<Vec<String>>, detected: &[&str]| {
            configured
                .clone()
                .unwrap_or_else(|| detected.iter().map(|s| (*s).to_string()).collect())
        };
        Self {
            install: pick(&overrides.install, kind.install_commands()),
            setup: pick(&overrides.setup, kind.setup_check_commands()),
            execute: pick(&overrides.execute, kind.execute_check_commands()),
        }
    }

    /// Detects the project kind from the manifests in the workspace.
    pub async fn detect(ws: &Workspace<'_>) -> Result<ProjectKind, SandboxError> {
        let probe = ws.run(PROBE_COMMAND).await?;
        let kind = ProjectKind::from_probe_output(&probe.stdout);
        info!(project_kind = %kind, "Detected project kind");
        Ok(kind)
    }

    pub fn steps(&self, check: CheckKind) -> &[String] {
        match check {
            CheckKind::Install => &self.install,
            CheckKind::Setup => &self.setup,
            CheckKind::Execute => &self.execute,
        }
    }

    /// Runs every step of `check`, stopping at the first failure.
    ///
    /// Only a broken workspace is an `Err`; failing steps are reported
    /// through [`CheckReport::passed`].
    pub async fn check(
        &self,
        ws: &Workspace<'_>,
        check: CheckKind,
    ) -> Result<CheckReport, SandboxError> {
        let mut transcript = String::new();

        for step in self.steps(check) {
            debug!(check = %check, step, "Running check step");
            let output = ws.run(step).await?;

            if !output.success() {
                info!(check = %check, step, exit_code = output.exit_code, "Check step failed");
                return Ok(CheckReport {
                    passed: false,
                    output: format!(
                        "$ {step} (exit {})\n{}",
                        output.exit_code,
                        output.combined()
                    ),
                });
            }

            transcript.push_str(&format!("$ {step}\n"));
            let combined = output.combined();
            if !combined.is_empty() {
                transcript.push_str(&combined);
                transcript.push('\n');
            }
        }

        Ok(CheckReport {
            passed: true,
            output: transcript,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{Reply, ScriptedSandbox};
    use crate::sandbox::WorkspaceHandle;

    #[test]
    fn test_overrides_replace_detected_steps() {
        let overrides = ValidationConfig {
            execute: Some(vec!["make check".to_string()]),
            ..ValidationConfig::default()
        };
        let validator = Validator::new(ProjectKind::Rust, &overrides);

        assert_eq!(validator.steps(CheckKind::Execute), ["make check"]);
        assert_eq!(validator.steps(CheckKind::Install), ["cargo fetch"]);
    }

    #[tokio::test]
    async fn test_check_stops_at_first_failure() {
        let sandbox = ScriptedSandbox::new()
            .on("cargo fmt --check", vec![Reply::ok("")])
            .on("cargo check", vec![Reply::fail("error[E0425]: cannot find value")]);
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);
        let validator = Validator::new(ProjectKind::Rust, &ValidationConfig::default());

        let report = validator.check(&ws, CheckKind::Execute).await.unwrap();

        assert!(!report.passed);
        assert!(report.output.starts_with("$ cargo check --all-targets (exit 1)"));
        assert!(report.output.contains("E0425"));
        assert_eq!(sandbox.count_matching("cargo test"), 0);
    }

    #[tokio::test]
    async fn test_check_passes_when_all_steps_pass() {
        let sandbox = ScriptedSandbox::new().on("go test", vec![Reply::ok("ok  pkg 0.01s")]);
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);
        let validator = Validator::new(ProjectKind::Go, &ValidationConfig::default());

        let report = validator.check(&ws, CheckKind::Setup).await.unwrap();

        assert!(report.passed);
        assert!(report.output.contains("$ go build ./..."));
        assert!(report.output.contains("ok  pkg"));
    }

    #[tokio::test]
    async fn test_unknown_project_passes_trivially() {
        let sandbox = ScriptedSandbox::new();
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);
        let validator = Validator::new(ProjectKind::Unknown, &ValidationConfig::default());

        let report = validator.check(&ws, CheckKind::Execute).await.unwrap();
        assert!(report.passed);
        assert!(sandbox.commands().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let sandbox =
            ScriptedSandbox::new().on("npm", vec![Reply::Transport("daemon gone".to_string())]);
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);
        let validator = Validator::new(ProjectKind::Node, &ValidationConfig::default());

        assert!(validator.check(&ws, CheckKind::Install).await.is_err());
    }

    #[tokio::test]
    async fn test_detect_uses_probe() {
        let sandbox = ScriptedSandbox::new().on("for f in", vec![Reply::ok("package.json\n")]);
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);

        assert_eq!(Validator::detect(&ws).await.unwrap(), ProjectKind::Node);
    }
}
