//! The `ask`, `dev` and `review` commands.
//!
//! Resolves the request from flags, environment and configuration, wires
//! up the workspace provider, agent and forge, and hands the run to the
//! pipeline. Resolution is pure so it can be tested without IO.

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::agent::{build_agent, Provider};
use crate::config::{Config, ProjectConfig};
use crate::detection::ProjectKind;
use crate::forge::{Forge, GitHubForge};
use crate::notifications::Notifier;
use crate::pipeline::format::{format_banner, format_result, BannerInfo};
use crate::pipeline::{
    Collaborators, Command, PipelineRunner, ProjectRef, RunRequest, Verbosity,
};
use crate::record::RunRecord;
use crate::sandbox::{DockerSandbox, HostSandbox, Sandbox};

/// Environment variable that overrides the configured agent provider.
const PROVIDER_ENV: &str = "SMITH_PROVIDER";

/// Environment variable holding the forge access token.
const TOKEN_ENV: &str = "SMITH_GITHUB_TOKEN";

/// Flags shared by `ask`, `dev` and `review`.
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct RunOptions {
    /// Configured project to run against
    #[arg(short, long)]
    pub project: Option<String>,

    /// Repository URL (overrides the project's)
    #[arg(long)]
    pub repo: Option<String>,

    /// Base branch (default: the project's, else main)
    #[arg(long)]
    pub base: Option<String>,

    /// Workspace image
    #[arg(long)]
    pub image: Option<String>,

    /// SSH key used for cloning and pushing
    #[arg(long)]
    pub ssh_key: Option<PathBuf>,

    /// Run timeout in minutes
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Use a scratch directory on the host instead of a container
    #[arg(long)]
    pub no_sandbox: bool,

    /// Agent provider (claude or opencode)
    #[arg(long)]
    pub provider: Option<String>,
}

/// Runs one pipeline. Returns whether the run succeeded.
pub(crate) async fn run(
    command: Command,
    working_branch: Option<String>,
    options: RunOptions,
    verbose: bool,
) -> Result<bool> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = Config::load(&cwd).context("Failed to load smith.toml")?;

    let project = select_project(&config, &options)?;
    let request = build_request(
        &config,
        project,
        command,
        working_branch,
        &options,
        ProjectKind::detect_local(&cwd),
        verbose,
    )?;

    let env_provider = std::env::var(PROVIDER_ENV).ok();
    let provider = resolve_provider(
        &config,
        options.provider.as_deref(),
        env_provider.as_deref(),
    )?;
    let agent = build_agent(provider, &config.agent);

    let use_sandbox = config.sandbox.enabled && !options.no_sandbox;
    let sandbox: Box<dyn Sandbox> = if use_sandbox {
        Box::new(DockerSandbox::connect(config.sandbox.clone())?)
    } else {
        let root = config
            .sandbox
            .workspace_root
            .clone()
            .unwrap_or_else(HostSandbox::default_root);
        Box::new(HostSandbox::new(root))
    };

    let env_token = std::env::var(TOKEN_ENV).ok();
    let forge = match resolve_token(project, env_token.as_deref()) {
        Some(token) => Some(GitHubForge::new(&token)?),
        None => None,
    };

    print!(
        "{}",
        format_banner(&BannerInfo {
            kind: request.kind().to_string(),
            repo: request.project.repo_url.clone(),
            base_branch: request.base_branch.clone(),
            working_branch: request.working_branch.clone(),
            agent: provider.to_string(),
            sandbox: sandbox.name().to_string(),
            image: request.project.image.clone(),
            timeout_minutes: request.timeout.as_secs() / 60,
        })
    );

    let deps = Collaborators {
        sandbox: sandbox.as_ref(),
        agent: agent.as_ref(),
        forge: forge.as_ref().map(|f| f as &dyn Forge),
    };
    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        info!("Interrupted, releasing workspace");
    };
    let result = PipelineRunner::new(&config, deps)
        .run_until(&request, cancel)
        .await;

    print!("{}", format_result(&result));

    match RunRecord::new(&request, &result).save(&cwd) {
        Ok(path) => debug!(path = %path.display(), "Saved run record"),
        Err(e) => warn!("Failed to save run record: {:#}", e),
    }

    Notifier::new(config.notifications.clone())
        .notify_run(&result, &request.project.repo_url)
        .await;

    Ok(result.succeeded)
}

/// The project named by `--project`, or the only configured project when
/// no repository was given on the command line.
fn select_project<'c>(
    config: &'c Config,
    options: &RunOptions,
) -> Result<Option<&'c ProjectConfig>> {
    match &options.project {
        Some(name) => match config.project(name) {
            Some(project) => Ok(Some(project)),
            None => bail!(
                "Unknown project '{name}'. Configured projects: {}",
                project_names(config)
            ),
        },
        None if options.repo.is_none() && config.projects.len() == 1 => {
            Ok(config.projects.first())
        }
        None => Ok(None),
    }
}

fn project_names(config: &Config) -> String {
    if config.projects.is_empty() {
        "none".to_string()
    } else {
        config
            .projects
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Builds the run request.
///
/// Precedence: flag, then project, then `[sandbox]`/`[pipeline]`
/// settings, then what the local checkout looks like.
fn build_request(
    config: &Config,
    project: Option<&ProjectConfig>,
    command: Command,
    working_branch: Option<String>,
    options: &RunOptions,
    local_kind: ProjectKind,
    verbose: bool,
) -> Result<RunRequest> {
    let Some(repo_url) = options
        .repo
        .clone()
        .or_else(|| project.map(|p| p.repo.clone()))
    else {
        bail!("No repository given. Pass --repo <url> or --project <name> (see smith.toml)");
    };

    let base_branch = options
        .base
        .clone()
        .or_else(|| project.map(|p| p.base_branch.clone()))
        .unwrap_or_else(|| "main".to_string());

    let image = options
        .image
        .clone()
        .or_else(|| project.and_then(|p| p.image.clone()))
        .or_else(|| config.sandbox.image.clone())
        .unwrap_or_else(|| local_kind.default_image().to_string());

    let ssh_key = options
        .ssh_key
        .clone()
        .or_else(|| project.and_then(|p| p.ssh_key.clone()));

    let minutes = options.timeout.unwrap_or(config.pipeline.timeout_minutes);

    Ok(RunRequest {
        command,
        project: ProjectRef {
            name: project.map(|p| p.name.clone()),
            repo_url,
            image,
            ssh_key,
        },
        base_branch,
        working_branch,
        timeout: Duration::from_secs(minutes.saturating_mul(60)),
        verbosity: if verbose {
            Verbosity::Verbose
        } else {
            Verbosity::Quiet
        },
    })
}

/// Picks the agent provider: CLI flag, then environment, then config.
fn resolve_provider(
    config: &Config,
    provider_override: Option<&str>,
    env_provider: Option<&str>,
) -> Result<Provider> {
    if let Some(p) = provider_override {
        debug!("Using CLI provider override: {}", p);
        return p.parse();
    }

    if let Some(env_val) = env_provider {
        if !env_val.is_empty() {
            debug!("Using {} env var: {}", PROVIDER_ENV, env_val);
            return env_val.parse();
        }
    }

    config.agent.get_provider()
}

/// The forge token: environment first, then the project's.
fn resolve_token(project: Option<&ProjectConfig>, env_token: Option<&str>) -> Option<String> {
    env_token
        .filter(|t| !t.trim().is_empty())
        .map(String::from)
        .or_else(|| project.and_then(|p| p.github_token.clone()))
}
