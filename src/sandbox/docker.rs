use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions, LogOutput,
    RemoveContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{
    clone_command, clone_failure, git_ssh_command, ExecOutput, Sandbox, SandboxError,
    WorkspaceHandle, WorkspaceSpec, WORKSPACE_DIR, WORKSPACE_LABEL,
};
use crate::config::SandboxConfig;

/// Where an explicit SSH key is mounted inside the container.
const KEY_MOUNT: &str = "/run/smith/id_key";

/// Where the host SSH agent socket is mounted inside the container.
const AGENT_SOCKET_MOUNT: &str = "/run/smith/ssh-agent.sock";

/// Makes sure git and an SSH client exist in images that ship without them.
const BOOTSTRAP_SCRIPT: &str = "command -v git >/dev/null 2>&1 && command -v ssh >/dev/null 2>&1 \
    || (command -v apk >/dev/null 2>&1 && apk add --no-cache git openssh-client ca-certificates) \
    || (command -v apt-get >/dev/null 2>&1 && apt-get update -qq \
        && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq git openssh-client ca-certificates) \
    ; command -v git >/dev/null 2>&1";

/// Runs each workspace in its own Docker container.
pub(crate) struct DockerSandbox {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerSandbox {
    /// Connects to the local Docker daemon.
    ///
    /// The connection is lazy; use [`DockerSandbox::ping`] to verify the
    /// daemon is actually reachable.
    pub fn connect(config: SandboxConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::runtime_unavailable(e.to_string()))?;
        Ok(Self { docker, config })
    }

    pub async fn ping(&self) -> Result<(), SandboxError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| SandboxError::runtime_unavailable(format!("{e}. Is Docker running?")))
    }

    /// Docker daemon version, for diagnostics.
    pub async fn version(&self) -> Result<String, SandboxError> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| SandboxError::runtime_unavailable(e.to_string()))?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image, "Pulling workspace image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            if let Err(e) = progress {
                warn!(image, error = %e, "Image pull failed");
                return Err(SandboxError::image_not_found(image));
            }
        }
        Ok(())
    }

    fn build_container_config(
        &self,
        spec: &WorkspaceSpec,
    ) -> Result<ContainerConfig<String>, SandboxError> {
        let (binds, env) = self.credential_mounts(spec)?;
        let memory = parse_memory_limit(&self.config.resources.memory)?;
        let cpus = self.config.resources.cpus.parse::<f64>().unwrap_or(4.0);

        let labels = HashMap::from([(WORKSPACE_LABEL.to_string(), "true".to_string())]);

        Ok(ContainerConfig {
            image: Some(spec.image.clone()),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(HostConfig {
                binds: Some(binds),
                memory: Some(memory),
                nano_cpus: Some((cpus * 1_000_000_000.0) as i64),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Volume bindings and environment for git credentials.
    ///
    /// An explicit key is mounted on its own. Without one, `~/.ssh` and
    /// `~/.gitconfig` are mounted read-only and the host agent socket is
    /// forwarded.
    fn credential_mounts(
        &self,
        spec: &WorkspaceSpec,
    ) -> Result<(Vec<String>, Vec<String>), SandboxError> {
        let mut binds = Vec::new();
        let mut env = vec!["GIT_TERMINAL_PROMPT=0".to_string()];

        for mount in &self.config.mounts {
            let host_path = expand_path(&mount.host)?;
            let mode = if mount.readonly { "ro" } else { "rw" };
            binds.push(format!("{}:{}:{}", host_path, mount.container, mode));
        }

        if let Some(key) = &spec.ssh_key {
            let key = expand_path(&key.to_string_lossy())?;
            if !Path::new(&key).exists() {
                return Err(SandboxError::provision_failed(format!(
                    "SSH key not found: {key}"
                )));
            }
            binds.push(format!("{key}:{KEY_MOUNT}:ro"));
            env.push(format!("GIT_SSH_COMMAND={}", git_ssh_command(Some(KEY_MOUNT))));
        } else {
            if let Some(home) = dirs::home_dir() {
                let ssh_dir = home.join(".ssh");
                if ssh_dir.exists() {
                    binds.push(format!("{}:/root/.ssh:ro", ssh_dir.display()));
                }
                let gitconfig = home.join(".gitconfig");
                if gitconfig.is_file() {
                    binds.push(format!("{}:/root/.gitconfig:ro", gitconfig.display()));
                }
            }
            if self.config.forward_ssh_agent {
                if let Ok(socket) = std::env::var("SSH_AUTH_SOCK") {
                    if Path::new(&socket).exists() {
                        binds.push(format!("{socket}:{AGENT_SOCKET_MOUNT}"));
                        env.push(format!("SSH_AUTH_SOCK={AGENT_SOCKET_MOUNT}"));
                    }
                }
            }
            env.push(format!("GIT_SSH_COMMAND={}", git_ssh_command(None)));
        }

        Ok((binds, env))
    }

    async fn exec_in(
        &self,
        container: &str,
        command: &str,
        working_dir: &str,
    ) -> Result<ExecOutput, SandboxError> {
        let exec = self
            .docker
            .create_exec(
                container,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(working_dir),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_exec_error(container, e))?;

        let mut output = ExecOutput::default();

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_exec_error(container, e))?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => {
                        output.stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        output.stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Err(e) => return Err(SandboxError::exec_failed(e.to_string())),
                    _ => {}
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_exec_error(container, e))?;
        output.exit_code = inspect.exit_code.unwrap_or(-1);
        Ok(output)
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn provision(
        &self,
        handle: &WorkspaceHandle,
        spec: &WorkspaceSpec,
    ) -> Result<(), SandboxError> {
        self.ping().await?;
        self.ensure_image(&spec.image).await?;

        let container_config = self.build_container_config(spec)?;

        debug!(container = handle.name(), image = %spec.image, "Creating container");
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: handle.name().to_string(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| SandboxError::provision_failed(format!("create container: {e}")))?;

        self.docker
            .start_container::<String>(handle.name(), None)
            .await
            .map_err(|e| SandboxError::provision_failed(format!("start container: {e}")))?;

        let bootstrap = self.exec_in(handle.name(), BOOTSTRAP_SCRIPT, "/").await?;
        if !bootstrap.success() {
            return Err(SandboxError::provision_failed(format!(
                "git is not available in image {} and could not be installed: {}",
                spec.image,
                bootstrap.combined()
            )));
        }

        let clone = self
            .exec_in(handle.name(), &clone_command(spec, "."), WORKSPACE_DIR)
            .await?;
        if !clone.success() {
            return Err(clone_failure(spec, &clone));
        }

        info!(container = handle.name(), repo = %spec.repo_url, "Workspace ready");
        Ok(())
    }

    async fn exec(
        &self,
        handle: &WorkspaceHandle,
        command: &str,
    ) -> Result<ExecOutput, SandboxError> {
        self.exec_in(handle.name(), command, WORKSPACE_DIR).await
    }

    async fn release(&self, handle: &WorkspaceHandle) -> Result<(), SandboxError> {
        debug!(container = handle.name(), "Removing container");
        match self
            .docker
            .remove_container(
                handle.name(),
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(SandboxError::exec_failed(format!(
                "remove container {}: {e}",
                handle.name()
            ))),
        }
    }

    async fn cleanup_orphaned(&self) -> Result<u32, SandboxError> {
        self.ping().await?;

        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{WORKSPACE_LABEL}=true")],
        )]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| SandboxError::exec_failed(format!("list containers: {e}")))?;

        let mut removed = 0;
        for container in containers {
            let Some(id) = container.id else { continue };
            match self
                .docker
                .remove_container(
                    &id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                Ok(()) => removed += 1,
                Err(e) => warn!(container = %id, error = %e, "Failed to remove orphaned workspace"),
            }
        }
        Ok(removed)
    }
}

fn is_not_found(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn map_exec_error(container: &str, error: DockerError) -> SandboxError {
    if is_not_found(&error) {
        SandboxError::not_provisioned(container)
    } else {
        SandboxError::exec_failed(error.to_string())
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> Result<String, SandboxError> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| SandboxError::provision_failed("Could not determine home directory"))?;
        Ok(home.join(rest).to_string_lossy().into_owned())
    } else {
        Ok(path.to_string())
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64, SandboxError> {
    let limit = limit.to_lowercase();
    let invalid = || SandboxError::provision_failed(format!("Invalid memory limit: {limit}"));

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().map_err(|_| invalid())?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().map_err(|_| invalid())?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mount;
    use std::path::PathBuf;

    fn spec(ssh_key: Option<PathBuf>) -> WorkspaceSpec {
        WorkspaceSpec {
            image: "node:20-bookworm".to_string(),
            repo_url: "git@github.com:acme/widgets.git".to_string(),
            clone_branch: "main".to_string(),
            ssh_key,
        }
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("8g").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_memory_limit("lots").is_err());
    }

    #[test]
    fn test_expand_path() {
        assert_eq!(expand_path("/usr/bin").unwrap(), "/usr/bin");

        if dirs::home_dir().is_some() {
            let expanded = expand_path("~/.ssh").unwrap();
            assert!(!expanded.starts_with('~'));
            assert!(expanded.ends_with("/.ssh"));
        }
    }

    #[test]
    fn test_container_config_labels_and_limits() {
        let sandbox = DockerSandbox::connect(SandboxConfig::default()).unwrap();
        let config = sandbox.build_container_config(&spec(None)).unwrap();

        assert_eq!(config.image.as_deref(), Some("node:20-bookworm"));
        assert_eq!(config.working_dir.as_deref(), Some(WORKSPACE_DIR));
        assert_eq!(
            config.labels.unwrap().get(WORKSPACE_LABEL).map(String::as_str),
            Some("true")
        );
        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(8 * 1024 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(4_000_000_000));
    }

    #[test]
    fn test_explicit_key_is_mounted_alone() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("deploy_key");
        std::fs::write(&key, "key").unwrap();

        let sandbox = DockerSandbox::connect(SandboxConfig::default()).unwrap();
        let (binds, env) = sandbox.credential_mounts(&spec(Some(key.clone()))).unwrap();

        assert_eq!(binds, vec![format!("{}:{KEY_MOUNT}:ro", key.display())]);
        assert!(env.iter().any(|e| e.contains("IdentitiesOnly=yes")));
        assert!(!env.iter().any(|e| e.starts_with("SSH_AUTH_SOCK")));
    }

    #[test]
    fn test_missing_key_fails_provisioning() {
        let sandbox = DockerSandbox::connect(SandboxConfig::default()).unwrap();
        let err = sandbox
            .credential_mounts(&spec(Some(PathBuf::from("/nonexistent/key"))))
            .unwrap_err();
        assert!(err.is_provisioning());
    }

    #[test]
    fn test_configured_mounts_are_bound() {
        let config = SandboxConfig {
            mounts: vec![Mount {
                host: "/opt/cache".to_string(),
                container: "/cache".to_string(),
                readonly: false,
            }],
            forward_ssh_agent: false,
            ..SandboxConfig::default()
        };
        let sandbox = DockerSandbox::connect(config).unwrap();
        let (binds, env) = sandbox.credential_mounts(&spec(None)).unwrap();
        assert!(binds.contains(&"/opt/cache:/cache:rw".to_string()));
        assert!(env.contains(&"GIT_TERMINAL_PROMPT=0".to_string()));
    }
}
