//! In-memory forge for tests.

use async_trait::async_trait;
use std::sync::Mutex;

use super::{Forge, ForgeError, PullRequestDraft, PullRequestRef, RepoSlug};

#[derive(Debug, Clone)]
struct StoredPullRequest {
    number: u64,
    head: String,
    title: String,
    open: bool,
}

#[derive(Debug, Default)]
pub(crate) struct InMemoryForge {
    pulls: Mutex<Vec<StoredPullRequest>>,
    fail_lookups: bool,
    fail_writes: bool,
}

impl InMemoryForge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn open_count(&self, head: &str) -> usize {
        self.pulls
            .lock()
            .unwrap()
            .iter()
            .filter(|pr| pr.open && pr.head == head)
            .count()
    }

    pub fn title_of(&self, number: u64) -> Option<String> {
        self.pulls
            .lock()
            .unwrap()
            .iter()
            .find(|pr| pr.number == number)
            .map(|pr| pr.title.clone())
    }
}

fn url(repo: &RepoSlug, number: u64) -> String {
    format!("https://forge.test/{repo}/pull/{number}")
}

#[async_trait]
impl Forge for InMemoryForge {
    async fn find_open_pull_request(
        &self,
        repo: &RepoSlug,
        head: &str,
    ) -> Result<Option<PullRequestRef>, ForgeError> {
        if self.fail_lookups {
            return Err(ForgeError::Api("lookup unavailable".to_string()));
        }
        Ok(self
            .pulls
            .lock()
            .unwrap()
            .iter()
            .find(|pr| pr.open && pr.head == head)
            .map(|pr| PullRequestRef {
                number: pr.number,
                url: url(repo, pr.number),
            }))
    }

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, ForgeError> {
        if self.fail_writes {
            return Err(ForgeError::Api("write unavailable".to_string()));
        }
        let mut pulls = self.pulls.lock().unwrap();
        let number = pulls.len() as u64 + 1;
        pulls.push(StoredPullRequest {
            number,
            head: draft.head.clone(),
            title: draft.title.clone(),
            open: true,
        });
        Ok(PullRequestRef {
            number,
            url: url(repo, number),
        })
    }

    async fn update_pull_request(
        &self,
        repo: &RepoSlug,
        number: u64,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, ForgeError> {
        if self.fail_writes {
            return Err(ForgeError::Api("write unavailable".to_string()));
        }
        let mut pulls = self.pulls.lock().unwrap();
        let pr = pulls
            .iter_mut()
            .find(|pr| pr.number == number)
            .ok_or_else(|| ForgeError::Api(format!("no pull request #{number}")))?;
        pr.title = draft.title.clone();
        Ok(PullRequestRef {
            number,
            url: url(repo, number),
        })
    }
}
