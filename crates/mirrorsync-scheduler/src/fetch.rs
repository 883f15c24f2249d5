//! Client for the fetch backend that clones and updates mirrors.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ConfiguredRepo, FetchError};

/// Result of a repository update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoUpdateResponse {
    /// When the mirror last fetched from its origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fetched: Option<DateTime<Utc>>,
    /// When the mirror's contents last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The service performing clones and fetches.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Ask for `repo` to be fetched unless it was fetched within `since`.
    async fn request_repo_update(
        &self,
        repo: &ConfiguredRepo,
        since: Duration,
    ) -> Result<RepoUpdateResponse, FetchError>;

    async fn is_repo_cloned(&self, name: &str) -> Result<bool, FetchError>;

    async fn list_cloned(&self) -> Result<Vec<String>, FetchError>;

    /// Delete the mirror of `name`.
    async fn remove(&self, name: &str) -> Result<(), FetchError>;
}

/// JSON-over-HTTP [`FetchBackend`].
#[derive(Debug, Clone)]
pub struct HttpFetchClient {
    http: Client,
    base_url: String,
}

impl HttpFetchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, FetchError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;
        check_status(response).await
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Serialize)]
struct RepoUpdateRequest<'a> {
    repo: &'a str,
    url: &'a str,
    since_secs: u64,
}

#[derive(Serialize)]
struct RepoRequest<'a> {
    repo: &'a str,
}

#[derive(Deserialize)]
struct ClonedResponse {
    cloned: bool,
}

#[derive(Deserialize)]
struct ListClonedResponse {
    #[serde(default)]
    repos: Vec<String>,
}

#[async_trait]
impl FetchBackend for HttpFetchClient {
    async fn request_repo_update(
        &self,
        repo: &ConfiguredRepo,
        since: Duration,
    ) -> Result<RepoUpdateResponse, FetchError> {
        let response = self
            .post(
                "repo-update",
                &RepoUpdateRequest {
                    repo: &repo.name,
                    url: &repo.url,
                    since_secs: since.as_secs(),
                },
            )
            .await?;
        let update: RepoUpdateResponse = response.json().await?;
        if let Some(error) = update.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(FetchError::Backend(error.to_string()));
        }
        debug!(repo = %repo.name, last_fetched = ?update.last_fetched, "repo update requested");
        Ok(update)
    }

    async fn is_repo_cloned(&self, name: &str) -> Result<bool, FetchError> {
        let response = self.post("is-repo-cloned", &RepoRequest { repo: name }).await?;
        let body: ClonedResponse = response.json().await?;
        Ok(body.cloned)
    }

    async fn list_cloned(&self) -> Result<Vec<String>, FetchError> {
        let url = format!("{}/list-cloned", self.base_url);
        let response = check_status(self.http.get(&url).send().await?).await?;
        let body: ListClonedResponse = response.json().await?;
        Ok(body.repos)
    }

    async fn remove(&self, name: &str) -> Result<(), FetchError> {
        self.post("delete", &RepoRequest { repo: name }).await?;
        Ok(())
    }
}
