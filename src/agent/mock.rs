//! Mock agent for testing.
//!
//! Returns scripted replies per prompt kind and records every invocation
//! so pipeline tests can assert on what was asked and how often.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{AgentInvoker, AgentReply, PromptKind};
use crate::sandbox::{SandboxError, Workspace};

/// A single mock response configuration.
#[derive(Debug, Clone)]
pub(crate) enum MockResponse {
    /// A successful reply with the given text.
    Reply(String),
    /// The agent ran but did not succeed.
    Unsuccessful(String),
    /// The workspace could not run the agent.
    Transport(String),
    /// The agent never returns.
    Hang,
}

/// A mock agent for testing.
///
/// Each prompt kind has its own queue. The last response of a queue is
/// repeated once the queue is drained. Kinds with no script get a
/// default reply that lets the pipeline move on.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockAgent {
    script: Arc<Mutex<HashMap<PromptKind, VecDeque<MockResponse>>>>,
    calls: Arc<Mutex<Vec<(PromptKind, String)>>>,
    invocation_count: Arc<AtomicUsize>,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the responses for `kind`.
    pub fn on(self, kind: PromptKind, responses: Vec<MockResponse>) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(kind, responses.into());
        self
    }

    /// Get the number of times `invoke` was called.
    pub fn invocation_count(&self) -> usize {
        self.invocation_count.load(Ordering::SeqCst)
    }

    /// Number of invocations with the given prompt kind.
    pub fn calls_of(&self, kind: PromptKind) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Contexts passed for `kind`, in call order.
    pub fn contexts_of(&self, kind: PromptKind) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, context)| context.clone())
            .collect()
    }

    fn next_response(&self, kind: PromptKind) -> MockResponse {
        let mut script = self.script.lock().unwrap();
        match script.get_mut(&kind) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| default_response(kind)),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| default_response(kind)),
            None => default_response(kind),
        }
    }
}

fn default_response(kind: PromptKind) -> MockResponse {
    match kind {
        PromptKind::Inspect => MockResponse::Reply("OK".to_string()),
        PromptKind::CleanupFilter => MockResponse::Reply("Cleaned answer.".to_string()),
        other => MockResponse::Reply(format!("{other} complete")),
    }
}

#[async_trait]
impl AgentInvoker for MockAgent {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn invoke(
        &self,
        _ws: &Workspace<'_>,
        kind: PromptKind,
        context: &str,
    ) -> Result<AgentReply, SandboxError> {
        self.invocation_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((kind, context.to_string()));

        match self.next_response(kind) {
            MockResponse::Reply(text) => Ok(AgentReply {
                text,
                succeeded: true,
            }),
            MockResponse::Unsuccessful(text) => Ok(AgentReply {
                text,
                succeeded: false,
            }),
            MockResponse::Transport(message) => Err(SandboxError::exec_failed(message)),
            MockResponse::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::ScriptedSandbox;
    use crate::sandbox::WorkspaceHandle;

    #[tokio::test]
    async fn test_mock_agent_replays_per_kind() {
        let agent = MockAgent::new().on(
            PromptKind::Inspect,
            vec![
                MockResponse::Reply("missing tests".to_string()),
                MockResponse::Reply("OK".to_string()),
            ],
        );
        let sandbox = ScriptedSandbox::new();
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);

        let first = agent.invoke(&ws, PromptKind::Inspect, "").await.unwrap();
        let second = agent.invoke(&ws, PromptKind::Inspect, "").await.unwrap();
        let third = agent.invoke(&ws, PromptKind::Inspect, "").await.unwrap();
        let task = agent.invoke(&ws, PromptKind::Task, "do it").await.unwrap();

        assert_eq!(first.text, "missing tests");
        assert_eq!(second.text, "OK");
        assert_eq!(third.text, "OK");
        assert_eq!(task.text, "task complete");
        assert_eq!(agent.invocation_count(), 4);
        assert_eq!(agent.calls_of(PromptKind::Inspect), 3);
        assert_eq!(agent.contexts_of(PromptKind::Task), vec!["do it".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_agent_transport_error() {
        let agent = MockAgent::new().on(
            PromptKind::Task,
            vec![MockResponse::Transport("gone".to_string())],
        );
        let sandbox = ScriptedSandbox::new();
        let handle = WorkspaceHandle::named("ws");
        let ws = Workspace::new(&sandbox, &handle);

        assert!(agent.invoke(&ws, PromptKind::Task, "").await.is_err());
    }
}
