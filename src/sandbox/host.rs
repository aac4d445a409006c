//! Host workspaces: a scratch clone on the local filesystem.
//!
//! Used by `--no-sandbox` and by tests that need real git behaviour
//! without a container runtime.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::process::Command;
use tracing::debug;

use super::{
    clone_command, clone_failure, git_ssh_command, ExecOutput, Sandbox, SandboxError,
    WorkspaceHandle, WorkspaceSpec,
};

#[derive(Debug)]
pub(crate) struct HostSandbox {
    root: PathBuf,
    ssh_commands: Mutex<HashMap<String, String>>,
}

impl HostSandbox {
    /// Creates a sandbox that places workspaces under `root`.
    pub(crate) fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ssh_commands: Mutex::new(HashMap::new()),
        }
    }

    /// Default location for host workspaces.
    pub(crate) fn default_root() -> PathBuf {
        std::env::temp_dir().join("smith-workspaces")
    }

    fn dir(&self, handle: &WorkspaceHandle) -> PathBuf {
        self.root.join(handle.name())
    }

    fn ssh_command(&self, handle: &WorkspaceHandle) -> Option<String> {
        self.ssh_commands
            .lock()
            .ok()
            .and_then(|map| map.get(handle.name()).cloned())
    }

    async fn shell(
        &self,
        dir: &Path,
        command: &str,
        ssh_command: Option<&str>,
    ) -> Result<ExecOutput, SandboxError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(ssh) = ssh_command {
            cmd.env("GIT_SSH_COMMAND", ssh);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| SandboxError::exec_failed(format!("spawn sh: {e}")))?;

        Ok(ExecOutput {
            exit_code: output.status.code().map_or(-1, i64::from),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl Sandbox for HostSandbox {
    fn name(&self) -> &'static str {
        "host"
    }

    async fn provision(
        &self,
        handle: &WorkspaceHandle,
        spec: &WorkspaceSpec,
    ) -> Result<(), SandboxError> {
        let dir = self.dir(handle);
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| SandboxError::provision_failed(format!("{}: {e}", self.root.display())))?;
        if dir.exists() {
            return Err(SandboxError::provision_failed(format!(
                "{} already exists",
                dir.display()
            )));
        }

        let ssh = spec.ssh_key.as_ref().map(|key| {
            let key = key.to_string_lossy();
            git_ssh_command(Some(&key))
        });
        if let Some(ssh) = &ssh {
            if let Ok(mut map) = self.ssh_commands.lock() {
                map.insert(handle.name().to_string(), ssh.clone());
            }
        }

        let dest = dir.to_string_lossy();
        debug!(workspace = %handle, dir = %dest, "Cloning into host workspace");
        let clone = self
            .shell(&self.root, &clone_command(spec, &dest), ssh.as_deref())
            .await?;
        if !clone.success() {
            return Err(clone_failure(spec, &clone));
        }
        Ok(())
    }

    async fn exec(
        &self,
        handle: &WorkspaceHandle,
        command: &str,
    ) -> Result<ExecOutput, SandboxError> {
        let dir = self.dir(handle);
        if !dir.is_dir() {
            return Err(SandboxError::not_provisioned(handle.name()));
        }
        self.shell(&dir, command, self.ssh_command(handle).as_deref())
            .await
    }

    async fn release(&self, handle: &WorkspaceHandle) -> Result<(), SandboxError> {
        if let Ok(mut map) = self.ssh_commands.lock() {
            map.remove(handle.name());
        }
        let dir = self.dir(handle);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SandboxError::exec_failed(format!(
                "remove {}: {e}",
                dir.display()
            ))),
        }
    }
}
