//! OpenCode agent
//!
//! Runs `opencode run [-m provider/model] "<prompt>"` inside the workspace.

use async_trait::async_trait;

use super::{prompt, run_agent_command, AgentInvoker, AgentReply, PromptKind};
use crate::config::OpenCodeConfig;
use crate::sandbox::{SandboxError, Workspace};

pub(crate) struct OpenCodeAgent {
    config: OpenCodeConfig,
    timeout_secs: u64,
}

impl OpenCodeAgent {
    pub fn new(config: OpenCodeConfig, timeout_secs: u64) -> Self {
        Self {
            config,
            timeout_secs,
        }
    }

    fn command_line(&self, prompt: &str) -> String {
        let mut args = vec![
            shell_words::quote(&self.config.path).into_owned(),
            "run".to_string(),
        ];
        if let Some(ref model) = self.config.model {
            args.push("-m".to_string());
            args.push(shell_words::quote(model).into_owned());
        }
        args.push(shell_words::quote(prompt).into_owned());

        format!("timeout {} {} < /dev/null", self.timeout_secs, args.join(" "))
    }
}

#[async_trait]
impl AgentInvoker for OpenCodeAgent {
    fn name(&self) -> &'static str {
        "opencode"
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
