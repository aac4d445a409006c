//! Agent invokers for different coding agent CLIs
//!
//! Agents run inside the run's workspace, never on the host:
//! - Claude: `claude -p --dangerously-skip-permissions` with the prompt on stdin
//! - OpenCode: `opencode run "prompt"`
//!
//! The provider is selected via `[agent].provider` in smith.toml.

mod claude;
#[cfg(test)]
pub(crate) mod mock;
mod opencode;
pub(crate) mod prompt;

pub(crate) use claude::ClaudeAgent;
pub(crate) use opencode::OpenCodeAgent;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::sandbox::{ExecOutput, SandboxError, Workspace};

/// Exit code `timeout(1)` uses when it kills the command.
const TIMEOUT_EXIT_CODE: i64 = 124;

/// Exit code the shell uses when the command does not exist.
const NOT_FOUND_EXIT_CODE: i64 = 127;

/// What an agent is being asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PromptKind {
    Question,
    Task,
    FixSetup,
    FixExecute,
    Review,
    Inspect,
    AddressFindings,
    CleanupFilter,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Question => "question",
            Self::Task => "task",
            Self::FixSetup => "fix-setup",
            Self::FixExecute => "fix-execute",
            Self::Review => "review",
            Self::Inspect => "inspect",
            Self::AddressFindings => "address-findings",
            Self::CleanupFilter => "cleanup-filter",
        };
        f.write_str(name)
    }
}

/// What came back from one agent invocation.
///
/// `succeeded` is false when the agent exited non-zero, timed out,
/// refused, or said nothing. The text is still kept so callers can
/// decide what to do with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AgentReply {
    pub text: String,
    pub succeeded: bool,
}

/// Trait for coding agents that run inside a workspace.
#[async_trait]
pub(crate) trait AgentInvoker: Send + Sync {
    /// Returns the provider name for display.
    fn name(&self) -> &'static str;

    /// Renders the prompt for `kind` around `context` and runs the agent.
    ///
    /// `Err` is reserved for a workspace that cannot run commands at all.
    async fn invoke(
        &self,
        ws: &Workspace<'_>,
        kind: PromptKind,
        context: &str,
    ) -> Result<AgentReply, SandboxError>;
}

/// Supported agent providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Provider {
    /// Claude Code CLI agent.
    #[default]
    Claude,
    /// OpenCode CLI agent.
    OpenCode,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::OpenCode => write!(f, "opencode"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "opencode" => Ok(Self::OpenCode),
            _ => anyhow::bail!("Unknown agent provider: '{s}'. Supported: claude, opencode"),
        }
    }
}

/// Builds the invoker for `provider` from its configuration section.
pub(crate) fn build_agent(provider: Provider, config: &AgentConfig) -> Box<dyn AgentInvoker> {
    match provider {
        Provider::Claude => Box::new(ClaudeAgent::new(
            config.claude.clone(),
            config.invoke_timeout_secs,
        )),
        Provider::OpenCode => Box::new(OpenCodeAgent::new(
            config.opencode.clone(),
            config.invoke_timeout_secs,
        )),
    }
}

/// Runs an agent command line in the workspace and interprets the result.
pub(crate) async fn run_agent_command(
    ws: &Workspace<'_>,
    agent: &str,
    kind: PromptKind,
    command: &str,
    timeout_secs: u64,
) -> Result<AgentReply, SandboxError> {
    info!(agent, prompt = %kind, "Invoking agent");
    let output = ws.run(command).await?;
    let reply = interpret(agent, &output, timeout_secs);
    if !reply.succeeded {
        warn!(
            agent,
            prompt = %kind,
            exit_code = output.exit_code,
            "Agent invocation did not succeed"
        );
    }
    Ok(reply)
}

fn interpret(agent: &str, output: &ExecOutput, timeout_secs: u64) -> AgentReply {
    match output.exit_code {
        0 => {
            let text = output.stdout.trim().to_string();
            let succeeded = !text.is_empty() && !prompt::looks_like_refusal(&text);
            AgentReply { text, succeeded }
        }
        TIMEOUT_EXIT_CODE => AgentReply {
            text: format!("{agent} timed out after {timeout_secs} seconds"),
            succeeded: false,
        },
        NOT_FOUND_EXIT_CODE => AgentReply {
            text: format!(
                "{agent} CLI not found in the workspace image: {}",
                output.combined()
            ),
            succeeded: false,
        },
        code => AgentReply {
            text: format!("{agent} exited with code {code}:\n{}", output.combined()),
            succeeded: false,
        },
    }
}
