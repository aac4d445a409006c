//! Isolated workspaces for pipeline runs.
//!
//! A run acquires exactly one workspace, executes every command of every
//! phase inside it, and releases it when the run ends. The container
//! implementation gives each run its own Docker container; the host
//! implementation uses a scratch directory and exists for `--no-sandbox`
//! and for integration tests.

mod docker;
mod error;
mod host;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

pub(crate) use docker::DockerSandbox;
pub(crate) use error::SandboxError;
pub(crate) use host::HostSandbox;

/// Label attached to every container this tool creates.
pub(crate) const WORKSPACE_LABEL: &str = "smith.workspace";

/// Directory inside the container where the repository is checked out.
pub(crate) const WORKSPACE_DIR: &str = "/workspace";

/// Identifies one workspace for the lifetime of a run.
///
/// The handle is minted before provisioning starts so that release can
/// always be attempted, even when provisioning fails half way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct WorkspaceHandle {
    name: String,
}

impl WorkspaceHandle {
    /// Creates a handle with a fresh, unique name.
    pub fn generate() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            name: format!("smith-{}", &id[..12]),
        }
    }

    /// Creates a handle with a fixed name.
    #[cfg(test)]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// What to put inside a freshly provisioned workspace.
#[derive(Debug, Clone)]
pub(crate) struct WorkspaceSpec {
    /// Container image (ignored by the host sandbox).
    pub image: String,
    /// Repository to clone.
    pub repo_url: String,
    /// Branch checked out by the initial clone.
    pub clone_branch: String,
    /// Explicit SSH key for fetching and pushing.
    pub ssh_key: Option<PathBuf>,
}

/// Result of one command executed inside a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// A successful command with the given standard output.
    #[cfg(test)]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed command with the given exit code and standard error.
    #[cfg(test)]
    pub fn failed(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Standard output followed by standard error, trimmed.
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => String::new(),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// An execution substrate that can host a single run's workspace.
///
/// Implementations must tolerate `release` being called for a handle
/// whose provisioning never completed.
#[async_trait]
pub(crate) trait Sandbox: Send + Sync {
    /// Name used in logs and status output.
    fn name(&self) -> &'static str;

    /// Creates the workspace and clones the repository into it.
    async fn provision(
        &self,
        handle: &WorkspaceHandle,
        spec: &WorkspaceSpec,
    ) -> Result<(), SandboxError>;

    /// Runs a shell command in the repository root of the workspace.
    ///
    /// A non-zero exit code is a normal `Ok` result. `Err` means the
    /// command could not be run at all.
    async fn exec(&self, handle: &WorkspaceHandle, command: &str)
        -> Result<ExecOutput, SandboxError>;

    /// Destroys the workspace. Missing workspaces are not an error.
    async fn release(&self, handle: &WorkspaceHandle) -> Result<(), SandboxError>;

    /// Removes workspaces left behind by interrupted runs.
    async fn cleanup_orphaned(&self) -> Result<u32, SandboxError> {
        Ok(0)
    }
}

/// A provisioned workspace bound to its sandbox.
#[derive(Clone, Copy)]
pub(crate) struct Workspace<'a> {
    sandbox: &'a dyn Sandbox,
    handle: &'a WorkspaceHandle,
}

impl<'a> Workspace<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, handle: &'a WorkspaceHandle) -> Self {
        Self { sandbox, handle }
    }

    pub fn handle(&self) -> &'a WorkspaceHandle {
        self.handle
    }

    pub async fn run(&self, command: &str) -> Result<ExecOutput, SandboxError> {
        debug!(workspace = %self.handle, command, "exec");
        let output = self.sandbox.exec(self.handle, command).await?;
        debug!(workspace = %self.handle, exit_code = output.exit_code, "exec finished");
        Ok(output)
    }
}

/// Shell command that clones `spec` into `dest`.
pub(crate) fn clone_command(spec: &WorkspaceSpec, dest: &str) -> String {
    format!(
        "git clone --no-single-branch --branch {} {} {}",
        shell_words::quote(&spec.clone_branch),
        shell_words::quote(&spec.repo_url),
        shell_words::quote(dest)
    )
}

/// Turns a failed clone into a provisioning message.
pub(crate) fn clone_failure(spec: &WorkspaceSpec, output: &ExecOutput) -> SandboxError {
    let diagnostics = output.combined();
    if diagnostics.contains("Remote branch") && diagnostics.contains("not found") {
        SandboxError::provision_failed(format!(
            "Branch '{}' does not exist on {}",
            spec.clone_branch, spec.repo_url
        ))
    } else {
        SandboxError::provision_failed(format!(
            "git clone of {} failed: {}",
            spec.repo_url, diagnostics
        ))
    }
}

/// SSH command used for git transport inside a workspace.
pub(crate) fn git_ssh_command(key_path: Option<&str>) -> String {
    match key_path {
        Some(path) => format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
            shell_words::quote(path)
        ),
        None => "ssh -o StrictHostKeyChecking=accept-new".to_string(),
    }
}
