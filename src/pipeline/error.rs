//! Terminal errors of a pipeline run.

use crate::git::{ConflictKind, GitError};
use crate::sandbox::SandboxError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Setup check still failing after {attempts} attempts:\n{output}")]
    SetupCheckExhausted { attempts: u32, output: String },

    #[error("Execute check still failing after {attempts} attempts:\n{output}")]
    ExecuteCheckExhausted { attempts: u32, output: String },

    #[error("Execution environment failure: {0}")]
    Transport(String),

    #[error("Git conflict ({kind}) on '{branch}' against {remote_ref}; nothing was pushed:\n{diagnostics}")]
    GitConflict {
        kind: ConflictKind,
        branch: String,
        remote_ref: String,
        diagnostics: String,
    },

    #[error("Push of '{branch}' rejected:\n{diagnostics}")]
    PushRejected { branch: String, diagnostics: String },

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("No changes to commit")]
    NoChanges,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Run timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Run cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Stable name of the error category, used in run records and notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Provisioning(_) => "provisioning-failure",
            Self::SetupCheckExhausted { .. } | Self::ExecuteCheckExhausted { .. } => {
                "validation-failure"
            }
            Self::Transport(_) => "transport-failure",
            Self::GitConflict { .. } => "git-conflict",
            Self::PushRejected { .. } => "push-rejected",
            Self::Git(_) => "git-failure",
            Self::NoChanges => "no-changes",
            Self::Configuration(_) => "configuration-error",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
        }
    }

    /// Maps a git failure while preparing the workspace.
    pub fn from_setup(error: GitError) -> Self {
        match error {
            GitError::Workspace(e) => e.into(),
            GitError::MissingBranch { remote, branch } => Self::Provisioning(format!(
                "Branch '{branch}' does not exist on {remote}. Ask and review only work on existing branches."
            )),
            other => Self::Provisioning(other.to_string()),
        }
    }
}

impl From<SandboxError> for PipelineError {
    fn from(error: SandboxError) -> Self {
        if error.is_provisioning() {
            Self::Provisioning(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<GitError> for PipelineError {
    fn from(error: GitError) -> Self {
        match error {
            GitError::Conflict {
                kind,
                branch,
                remote_ref,
                diagnostics,
            } => Self::GitConflict {
                kind,
                branch,
                remote_ref,
                diagnostics,
            },
            GitError::Rejected {
                branch,
                diagnostics,
            } => Self::PushRejected {
                branch,
                diagnostics,
            },
            GitError::NothingToCommit => Self::NoChanges,
            GitError::Workspace(e) => e.into(),
            other @ (GitError::Command { .. } | GitError::MissingBranch { .. }) => {
                Self::Git(other.to_string())
            }
        }
    }
}
