use async_trait::async_trait;
use octocrab::models::pulls::PullRequest;
use octocrab::params::State;
use octocrab::Octocrab;

use super::{Forge, ForgeError, PullRequestDraft, PullRequestRef, RepoSlug};

/// Pull requests on GitHub through its REST API.
pub(crate) struct GitHubForge {
    client: Octocrab,
}

impl GitHubForge {
    pub fn new(token: &str) -> Result<Self, ForgeError> {
        let client = Octocrab::builder()
            .personal_token(token.to_string())
            .build()
            .map_err(|e| ForgeError::Api(format!("Failed to build GitHub client: {e}")))?;
        Ok(Self { client })
    }
}

fn to_ref(pr: PullRequest) -> PullRequestRef {
    PullRequestRef {
        number: pr.number,
        url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
    }
}

fn api_error(e: octocrab::Error) -> ForgeError {
    ForgeError::Api(e.to_string())
}

#[async_trait]
impl Forge for GitHubForge {
    async fn find_open_pull_request(
        &self,
        repo: &RepoSlug,
        head: &str,
    ) -> Result<Option<PullRequestRef>, ForgeError> {
        let page = self
            .client
            .pulls(&repo.owner, &repo.name)
            .list()
            .state(State::Open)
            .head(format!("{}:{head}", repo.owner))
            .per_page(50)
            .send()
            .await
            .map_err(api_error)?;

        Ok(page
            .items
            .into_iter()
            .find(|pr| pr.head.ref_field == head)
            .map(to_ref))
    }

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, ForgeError> {
        let created = self
            .client
            .pulls(&repo.owner, &repo.name)
            .create(&draft.title, &draft.head, &draft.base)
            .body(&draft.body)
            .send()
            .await
            .map_err(api_error)?;
        Ok(to_ref(created))
    }

    async fn update_pull_request(
        &self,
        repo: &RepoSlug,
        number: u64,
        draft: &PullRequestDraft,
    ) -> Result<PullRequestRef, ForgeError> {
        let updated = self
            .client
            .pulls(&repo.owner, &repo.name)
            .update(number)
            .title(&draft.title)
            .body(&draft.body)
            .send()
            .await
            .map_err(api_error)?;
        Ok(to_ref(updated))
    }
}
