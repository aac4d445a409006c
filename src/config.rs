use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::agent::Provider;
use crate::pipeline::ExhaustionPolicy;

pub(crate) const CONFIG_FILE: &str = "smith.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

/// Agent configuration - selects and configures the coding agent CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Which agent provider to use: "claude" or "opencode"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Upper bound for a single agent invocation, in seconds
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,

    #[serde(default)]
    pub claude: ClaudeConfig,

    #[serde(default)]
    pub opencode: OpenCodeConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            invoke_timeout_secs: default_invoke_timeout(),
            claude: ClaudeConfig::default(),
            opencode: OpenCodeConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Parse the provider string into a Provider enum
    pub fn get_provider(&self) -> Result<Provider> {
        self.provider.parse()
    }
}

fn default_provider() -> String {
    "claude".to_string()
}

fn default_invoke_timeout() -> u64 {
    1800
}

/// Claude Code CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaudeConfig {
    /// Path to the Claude CLI inside the workspace image
    #[serde(default = "default_claude_path")]
    pub path: String,

    /// Model to use (optional)
    #[serde(default)]
    pub model: Option<String>,

    /// Skip permission prompts (required for unattended runs)
    #[serde(default = "default_true")]
    pub skip_permissions: bool,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            path: default_claude_path(),
            model: None,
            skip_permissions: true,
        }
    }
}

fn default_claude_path() -> String {
    "claude".to_string()
}

/// OpenCode CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenCodeConfig {
    #[serde(default = "default_opencode_path")]
    pub path: String,

    /// Model in provider/model form, e.g. "anthropic/claude-sonnet-4"
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for OpenCodeConfig {
    fn default() -> Self {
        Self {
            path: default_opencode_path(),
            model: None,
        }
    }
}

fn default_opencode_path() -> String {
    "opencode".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Run workspaces in Docker containers. When false, workspaces are
    /// scratch directories on the host.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Default image when neither the project nor the command names one
    #[serde(default)]
    pub image: Option<String>,

    /// Additional volume mounts
    #[serde(default)]
    pub mounts: Vec<Mount>,

    /// Forward the host SSH agent socket when no explicit key is given
    #[serde(default = "default_true")]
    pub forward_ssh_agent: bool,

    /// Resource limits
    #[serde(default)]
    pub resources: ResourceConfig,

    /// Where host workspaces are created (defaults to the system temp dir)
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            image: None,
            mounts: Vec::new(),
            forward_ssh_agent: true,
            resources: ResourceConfig::default(),
            workspace_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    pub host: String,
    pub container: String,
    #[serde(default = "default_true")]
    pub readonly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "8g")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit (e.g., "4")
    #[serde(default = "default_cpus")]
    pub cpus: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Remote that base and working branches live on
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Author name for commits made by dev runs
    #[serde(default = "default_commit_name")]
    pub commit_name: String,

    /// Author email for commits made by dev runs
    #[serde(default = "default_commit_email")]
    pub commit_email: String,

    /// Branches a dev run must never push to
    #[serde(default = "default_protected_branches")]
    pub protected_branches: Vec<String>,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            commit_name: default_commit_name(),
            commit_email: default_commit_email(),
            protected_branches: default_protected_branches(),
        }
    }
}

impl GitConfig {
    /// Check if a branch is protected
    pub fn is_protected(&self, branch: &str) -> bool {
        self.protected_branches.iter().any(|b| b == branch)
    }
}

/// Retry budgets and run-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_three")]
    pub setup_attempts: u32,

    #[serde(default = "default_three")]
    pub execute_check_attempts: u32,

    #[serde(default = "default_three")]
    pub dev_assurance_attempts: u32,

    #[serde(default = "default_cleanup_passes")]
    pub ask_cleanup_passes: u32,

    /// What a dev run does when the execute check never passes
    #[serde(default)]
    pub on_execute_check_exhausted: ExhaustionPolicy,

    /// Whole-run timeout
    #[serde(default = "default_timeout")]
    pub timeout_minutes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            setup_attempts: default_three(),
            execute_check_attempts: default_three(),
            dev_assurance_attempts: default_three(),
            ask_cleanup_passes: default_cleanup_passes(),
            on_execute_check_exhausted: ExhaustionPolicy::default(),
            timeout_minutes: default_timeout(),
        }
    }
}

/// Per-project overrides for the detected check commands.
///
/// Each list replaces the detected steps for that check when present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default)]
    pub install: Option<Vec<String>>,
    #[serde(default)]
    pub setup: Option<Vec<String>>,
    #[serde(default)]
    pub execute: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write JSON logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Notification targets: "desktop", "webhook:<url>" or "none"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub on_complete: Option<String>,
    #[serde(default)]
    pub on_failure: Option<String>,
}

/// A named project so commands can say `--project widgets`
#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub repo: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub ssh_key: Option<PathBuf>,
    #[serde(default)]
    pub github_token: Option<String>,
}

impl std::fmt::Debug for ProjectConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectConfig")
            .field("name", &self.name)
            .field("repo", &self.repo)
            .field("base_branch", &self.base_branch)
            .field("image", &self.image)
            .field("ssh_key", &self.ssh_key)
            .field(
                "github_token",
                &self.github_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_three() -> u32 {
    3
}

fn default_cleanup_passes() -> u32 {
    2
}

fn default_memory() -> String {
    "8g".to_string()
}

fn default_cpus() -> String {
    "4".to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_commit_name() -> String {
    "smith".to_string()
}

fn default_commit_email() -> String {
    "smith@localhost".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_protected_branches() -> Vec<String> {
    vec![
        "main".to_string(),
        "master".to_string(),
        "production".to_string(),
    ]
}

impl Config {
    /// Load configuration, using defaults if no file is found.
    ///
    /// `smith.toml` in `project_dir` wins over the user-level
    /// `<config dir>/smith/config.toml`.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let local = project_dir.join(CONFIG_FILE);
        let path = if local.exists() {
            Some(local)
        } else {
            global_config_path().filter(|p| p.exists())
        };

        let Some(config_path) = path else {
            return Ok(Self::default());
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Reject values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        let budgets = [
            ("pipeline.setup_attempts", self.pipeline.setup_attempts),
            (
                "pipeline.execute_check_attempts",
                self.pipeline.execute_check_attempts,
            ),
            (
                "pipeline.dev_assurance_attempts",
                self.pipeline.dev_assurance_attempts,
            ),
            ("pipeline.ask_cleanup_passes", self.pipeline.ask_cleanup_passes),
        ];
        for (key, value) in budgets {
            if value == 0 {
                bail!("{key} must be at least 1");
            }
        }
        if self.pipeline.timeout_minutes == 0 {
            bail!("pipeline.timeout_minutes must be at least 1");
        }
        if self.agent.invoke_timeout_secs == 0 {
            bail!("agent.invoke_timeout_secs must be at least 1");
        }
        self.agent.get_provider()?;

        let mut names: Vec<&str> = self.projects.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
            bail!("Project '{}' is defined more than once", pair[0]);
        }
        Ok(())
    }

    /// Look up a configured project by name
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("smith").join("config.toml"))
}
