//! Scripted sandbox for pipeline tests.
//!
//! Commands are matched against substring rules in the order the rules
//! were added. Each rule replays its queued replies and then keeps
//! repeating the last one.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ExecOutput, Sandbox, SandboxError, WorkspaceHandle, WorkspaceSpec};

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Output(ExecOutput),
    /// The command could not be delivered.
    Transport(String),
    /// The command never returns.
    Hang,
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Self::Output(ExecOutput::ok(stdout))
    }

    pub fn fail(stderr: &str) -> Self {
        Self::Output(ExecOutput::failed(1, stderr))
    }
}

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

impl Rule {
    fn next(&mut self) -> Reply {
        if self.replies.len() > 1 {
            self.replies.pop_front().unwrap_or(Reply::ok(""))
        } else {
            self.replies.front().cloned().unwrap_or(Reply::ok(""))
        }
    }
}

#[derive(Default)]
pub(crate) struct ScriptedSandbox {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    provision_failure: Option<String>,
    provisions: AtomicUsize,
    releases: AtomicUsize,
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for commands containing `needle`.
    pub fn on(self, needle: &str, replies: Vec<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn fail_provision(mut self, message: &str) -> Self {
        self.provision_failure = Some(message.to_string());
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    pub fn provision_count(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn provision(
        &self,
        _handle: &WorkspaceHandle,
        _spec: &WorkspaceSpec,
    ) -> Result<(), SandboxError> {
        self.provisions.fetch_add(1, Ordering::SeqCst);
        match &self.provision_failure {
            Some(message) => Err(SandboxError::provision_failed(message.clone())),
            None => Ok(()),
        }
    }

    async fn exec(
        &self,
        _handle: &WorkspaceHandle,
        command: &str,
    ) -> Result<ExecOutput, SandboxError> {
        self.commands.lock().unwrap().push(command.to_string());
        let reply = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|rule| command.contains(&rule.needle))
                .map_or(Reply::ok(""), Rule::next)
        };
        match reply {
            Reply::Output(output) => Ok(output),
            Reply::Transport(message) => Err(SandboxError::exec_failed(message)),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn release(&self, _handle: &WorkspaceHandle) -> Result<(), SandboxError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_replay_then_repeat_last() {
        let sandbox = ScriptedSandbox::new().on(
            "cargo test",
            vec![Reply::fail("1 failed"), Reply::ok("all passed")],
        );
        let handle = WorkspaceHandle::named("ws");

        let first = sandbox.exec(&handle, "cargo test").await.unwrap();
        let second = sandbox.exec(&handle, "cargo test").await.unwrap();
        let third = sandbox.exec(&handle, "cargo test").await.unwrap();
        let other = sandbox.exec(&handle, "ls").await.unwrap();

        assert!(!first.success());
        assert!(second.success());
        assert!(third.success());
        assert!(other.success());
        assert_eq!(sandbox.count_matching("cargo test"), 3);
    }
}
