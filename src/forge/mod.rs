//! Pull requests on the hosted forge.
//!
//! [`ensure_pull_request`] looks for an open pull request from the
//! working branch before creating one, so repeated dev runs on the same
//! branch keep updating a single pull request.

mod github;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

pub(crate) use github::GitHubForge;

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("Cannot determine owner and repository from URL '{0}'")]
    UnsupportedUrl(String),

    #[error("Forge API error: {0}")]
    Api(String),
}

/// Owner and name of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    /// Parses SSH (`git@host:owner/repo.git`, `ssh://git@host/owner/repo`)
    /// and HTTPS (`https://host/owner/repo.git`) remote URLs.
    pub fn parse(url: &str) -> Result<Self, ForgeError> {
        let unsupported = || ForgeError::UnsupportedUrl(url.to_string());
        let trimmed = url.trim().trim_end_matches('/');

        let path = if let Some(rest) = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .or_else(|| trimmed.strip_prefix("ssh://"))
        {
            rest.split_once('/').map(|(_, path)| path).ok_or_else(unsupported)?
        } else if let Some((user_host, path)) = trimmed.split_once(':') {
            if !user_host.contains('@') {
                return Err(unsupported());
            }
            path
        } else {
            return Err(unsupported());
        };

        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut parts = path.rsplitn(2, '/');
        let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(unsupported)?;
        let owner = parts.next().filter(|s| !s.is_empty()).ok_or_else(unsupported)?;

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A pull request as far as a run cares about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PullRequestDraft {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

#[async_trait]
pub(crate) trait Forge: Send + Sync {
    /// The open pull request whose head is `head`, if any.
    async fn find_open_pull_request(
        &self,
        repo: &RepoSlug,
        head: &str,
    ) -> Result<Option<PullRequestRef>, ForgeError>;

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, ForgeError>;

    async fn update_pull_request(
        &self,
        repo: &RepoSlug,
        number: u64,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, ForgeError>;
}

/// Creates the pull request for `draft.head`, or updates the open one.
///
/// A failed lookup is returned as an error rather than falling through
/// to create, which could open a duplicate.
pub(crate) async fn ensure_pull_request(
    forge: &dyn Forge,
    repo_url: &str,
    draft: &PullRequestDraft,
) -> Result<PullRequestRef, ForgeError> {
    let repo = RepoSlug::parse(repo_url)?;

    match forge.find_open_pull_request(&repo, &draft.head).await? {
        Some(existing) => {
            let updated = forge
                .update_pull_request(&repo, existing.number, draft)
                .await?;
            info!(repo = %repo, number = updated.number, "Updated pull request");
            Ok(updated)
        }
        None => {
            let created = forge.create_pull_request(&repo, draft).await?;
            info!(repo = %repo, number = created.number, "Created pull request");
            Ok(created)
        }
    }
}
