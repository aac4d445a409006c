//! Claude Code agent
//!
//! Invokes the Claude CLI in print mode inside the workspace:
//! ```bash
//! printf '%s' '<prompt>' | timeout 1800 claude -p --dangerously-skip-permissions --output-format text
//! ```
//!
//! See: https://docs.anthropic.com/en/docs/claude-code

use async_trait::async_trait;

use super::{prompt, run_agent_command, AgentInvoker, AgentReply, PromptKind};
use crate::config::ClaudeConfig;
use crate::sandbox::{SandboxError, Workspace};

/// Claude Code CLI agent
pub(crate) struct ClaudeAgent {
    config: ClaudeConfig,
    timeout_secs: u64,
}

impl ClaudeAgent {
    pub fn new(config: ClaudeConfig, timeout_secs: u64) -> Self {
        Self {
            config,
            timeout_secs,
        }
    }

    /// Shell command that feeds `prompt` to the CLI on stdin.
    fn command_line(&self, prompt: &str) -> String {
        // claude -p [--dangerously-skip-permissions] [--model model] --output-format text
        let mut args = vec![shell_words::quote(&self.config.path).into_owned(), "-p".to_string()];

        if self.config.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        if let Some(ref model) = self.config.model {
            args.push("--model".to_string());
            args.push(shell_words::quote(model).into_owned());
        }

        args.push("--output-format".to_string());
        args.push("text".to_string());

        format!(
            "printf '%s' {} | timeout {} {}",
            shell_words::quote(prompt),
            self.timeout_secs,
            args.join(" ")
        )
    }
}

#[async_trait]
impl AgentInvoker for ClaudeAgent {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn invoke(
        &self,
        ws: &Workspace<'_>,
        kind: PromptKind,
        context: &str,
    ) -> Result<AgentReply, SandboxError> {
        let prompt = prompt::render(kind, context);
        let command = self.command_line(&prompt);
        run_agent_command(ws, self.name(), kind, &command, self.timeout_secs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_defaults() {
        let agent = ClaudeAgent::new(ClaudeConfig::default(), 1800);
        let cmd = agent.command_line("fix the bug");
        assert_eq!(
            cmd,
            "printf '%s' 'fix the bug' | timeout 1800 claude -p --dangerously-skip-permissions --output-format text"
        );
    }

    #[test]
    fn test_command_line_with_model_and_permissions() {
        let config = ClaudeConfig {
            path: "/opt/claude".to_string(),
            model: Some("opus".to_string()),
            skip_permissions: false,
        };
        let agent = ClaudeAgent::new(config, 60);
        let cmd = agent.command_line("it's done");
        assert!(cmd.starts_with("printf '%s' 'it'\\''s done' | timeout 60 /opt/claude -p"));
        assert!(cmd.contains("--model opus"));
        assert!(!cmd.contains("--dangerously-skip-permissions"));
    }

    #[test]
    fn test_quoted_command_fits_one_shell_argument() {
        let agent = ClaudeAgent::new(ClaudeConfig::default(), 1800);
        let feedback = "it's failing: 'x' != 'y'\n".repeat(20_000);
        let cmd = agent.command_line(&prompt::render(PromptKind::FixExecute, &feedback));
        assert!(cmd.len() < 128 * 1024);
    }
}
