//! Domain-specific error types for workspace operations.
//!
//! Typed errors let the pipeline tell a broken execution substrate apart
//! from a command that merely failed inside a healthy workspace.

/// Errors that can occur while provisioning, using or releasing a workspace.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The container runtime is not running or not reachable.
    #[error("Container runtime is not available: {message}")]
    RuntimeUnavailable { message: String },

    /// The workspace image could not be found or pulled.
    #[error("Workspace image not available: {image}")]
    ImageNotFound { image: String },

    /// The workspace could not be created or the repository not checked out.
    #[error("Failed to provision workspace: {message}")]
    ProvisionFailed { message: String },

    /// A command could not be delivered to the workspace.
    #[error("Workspace command could not be executed: {message}")]
    ExecFailed { message: String },

    /// The workspace does not exist (never provisioned or already released).
    #[error("Workspace '{name}' is not provisioned")]
    NotProvisioned { name: String },
}

impl SandboxError {
    /// Creates a `RuntimeUnavailable` error.
    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            message: message.into(),
        }
    }

    /// Creates an `ImageNotFound` error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound {
            image: image.into(),
        }
    }

    /// Creates a `ProvisionFailed` error.
    pub fn provision_failed(message: impl Into<String>) -> Self {
        Self::ProvisionFailed {
            message: message.into(),
        }
    }

    /// Creates an `ExecFailed` error.
    pub fn exec_failed(message: impl Into<String>) -> Self {
        Self::ExecFailed {
            message: message.into(),
        }
    }

    /// Creates a `NotProvisioned` error.
    pub fn not_provisioned(name: impl Into<String>) -> Self {
        Self::NotProvisioned { name: name.into() }
    }

    /// Returns true if the failure happened while acquiring the workspace.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            Self::RuntimeUnavailable { .. } | Self::ImageNotFound { .. } | Self::ProvisionFailed { .. }
        )
    }
}
