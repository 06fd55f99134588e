//! GitLab API client.
//!
//! Provides the HTTP page source for GitLab API v4: token authentication, a
//! bounded request timeout and bounded retry with exponential backoff.

use crate::error::AppError;
use crate::services::paginator::{Listing, PageSource};
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// GitLab API client configuration.
#[derive(Debug, Clone)]
pub struct GitLabClientConfig {
    /// Base URL of the GitLab instance (e.g., `https://gitlab.com`).
    pub base_url: String,

    /// Personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Retry policy for a single page fetch.
    pub backoff: BackoffPolicy,
}

impl Default for GitLabClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            timeout_secs: 30,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Exponential backoff, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt + 1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    Fatal,
}

/// Server errors and rate limiting are worth retrying; other statuses are not.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::Fatal
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::Fatal
    }
}

/// GitLab project from `GET /projects`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabProject {
    pub id: i64,
    pub name: String,
    pub path_with_namespace: String,
    pub description: Option<String>,
    pub created_at: Option<String>,
    pub default_branch: Option<String>,
    pub web_url: String,
}

/// User reference embedded in MRs and issues.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    #[serde(default)]
    pub id: i64,
    pub username: String,
    pub name: String,
}

/// Project member from `GET /projects/:id/members/all`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMember {
    pub id: i64,
    pub username: String,
    pub name: String,
    pub access_level: i64,
}

/// Commit from `GET /projects/:id/repository/commits?with_stats=true`.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabCommit {
    /// Full SHA.
    pub id: String,
    pub short_id: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub committed_date: Option<String>,
    pub message: Option<String>,
    pub stats: Option<GitLabCommitStats>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitLabCommitStats {
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub total: i64,
}

/// GitLab merge request from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub iid: i64,
    pub title: String,
    pub author: Option<GitLabUser>,
    pub state: String,
    pub created_at: Option<String>,
    pub merged_at: Option<String>,
    pub closed_at: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub merge_commit_sha: Option<String>,
}

/// GitLab issue from API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabIssue {
    pub iid: i64,
    pub title: String,
    pub author: Option<GitLabUser>,
    pub assignees: Option<Vec<GitLabUser>>,
    pub state: String,
    pub labels: Option<Vec<String>>,
    pub created_at: Option<String>,
    pub closed_at: Option<String>,
}

/// GitLab API client.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    client: Client,
    config: GitLabClientConfig,
}

impl GitLabClient {
    /// Create a new GitLab client.
    pub fn new(config: GitLabClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&config.token)
            .map_err(|_| AppError::config("Invalid token format"))?;
        headers.insert("PRIVATE-TOKEN", token_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the base URL for API requests.
    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v4{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    /// Decode a page, or turn a non-success status into a fetch error.
    async fn handle_response(response: Response) -> Result<Vec<serde_json::Value>, AppError> {
        let status = response.status();
        let url = response.url().to_string();

        if status.is_success() {
            return response
                .json::<Vec<serde_json::Value>>()
                .await
                .map_err(|e| AppError::decode(format!("Failed to parse page: {}", e), url));
        }

        let body = response.text().await.unwrap_or_default();
        if !body.is_empty() {
            log::debug!("GitLab returned {} for {}: {}", status.as_u16(), url, body);
        }

        Err(AppError::fetch(
            url,
            status.as_u16(),
            status.canonical_reason().unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl PageSource for GitLabClient {
    async fn fetch_page(
        &self,
        listing: &Listing,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<serde_json::Value>, AppError> {
        let url = self.api_url(&listing.path);
        let backoff = self.config.backoff;
        let mut attempt = 0u32;

        loop {
            let sent = self
                .client
                .get(&url)
                .query(&listing.params)
                .query(&[("per_page", per_page.to_string()), ("page", page.to_string())])
                .send()
                .await;

            let (disposition, err) = match sent {
                Ok(response) => {
                    let status = response.status();
                    match Self::handle_response(response).await {
                        Ok(records) => return Ok(records),
                        Err(err) => (classify_status(status), err),
                    }
                }
                Err(e) => (classify_reqwest_error(&e), AppError::from(e)),
            };

            if disposition == RetryDisposition::Fatal || attempt >= backoff.max_retries {
                return Err(err);
            }

            let delay = backoff.delay_for_attempt(attempt);
            attempt += 1;
            log::warn!(
                "{} (attempt {}/{}), retrying in {}ms",
                err,
                attempt,
                backoff.max_retries + 1,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}
