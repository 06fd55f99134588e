//! Page-by-page walker over GitLab listing endpoints.
//!
//! A listing ends the first time a page comes back empty. A page shorter than
//! `per_page` does not end it.

use crate::error::AppError;
use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use serde_json::Value;

/// Records requested per page.
pub const PAGE_SIZE: u32 = 100;

/// A listing endpoint plus its fixed query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Path below `/api/v4`, starting with `/`.
    pub path: String,
    pub params: Vec<(String, String)>,
}

impl Listing {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    /// Projects the token's user is a member of.
    pub fn projects() -> Self {
        Self::new("/projects").param("membership", "true")
    }

    /// Direct and inherited members.
    pub fn members(project_id: i64) -> Self {
        Self::new(format!("/projects/{}/members/all", project_id))
    }

    /// Commits on all branches, with per-commit stats.
    pub fn commits(project_id: i64) -> Self {
        Self::new(format!("/projects/{}/repository/commits", project_id))
            .param("all", "true")
            .param("with_stats", "true")
    }

    pub fn merge_requests(project_id: i64) -> Self {
        Self::new(format!("/projects/{}/merge_requests", project_id)).param("state", "all")
    }

    pub fn issues(project_id: i64) -> Self {
        Self::new(format!("/projects/{}/issues", project_id)).param("state", "all")
    }
}

/// Something that can fetch one page of a listing.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch page `page` (1-based). A non-success response is an `AppError::Fetch`.
    async fn fetch_page(
        &self,
        listing: &Listing,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<Value>, AppError>;
}

/// Lazy, non-restartable walk over one listing.
pub struct Paginator<'a> {
    source: &'a dyn PageSource,
    listing: Listing,
    next_page: u32,
    pages_fetched: u32,
    done: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(source: &'a dyn PageSource, listing: Listing) -> Self {
        Self {
            source,
            listing,
            next_page: 1,
            pages_fetched: 0,
            done: false,
        }
    }

    pub fn listing(&self) -> &Listing {
        &self.listing
    }

    /// Fetch calls issued so far.
    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Next non-empty page, or `None` once the listing is exhausted.
    ///
    /// After an error or the terminating empty page, no further requests are made.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>, AppError> {
        if self.done {
            return Ok(None);
        }

        self.pages_fetched += 1;
        let page = match self
            .source
            .fetch_page(&self.listing, self.next_page, PAGE_SIZE)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }

        self.next_page += 1;
        Ok(Some(page))
    }

    /// Drain every page into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<Value>, AppError> {
        let mut records = Vec::new();
        while let Some(page) = self.next_page().await? {
            records.extend(page);
        }
        log::debug!(
            "{} -> {} records in {} requests",
            self.listing.path,
            records.len(),
            self.pages_fetched
        );
        Ok(records)
    }

    /// Yield records one at a time, fetching pages on demand.
    pub fn into_stream(self) -> impl Stream<Item = Result<Value, AppError>> + 'a {
        stream::try_unfold(self, |mut paginator| async move {
            let page = paginator.next_page().await?;
            Ok::<_, AppError>(page.map(|records| {
                let records = stream::iter(records.into_iter().map(Ok::<Value, AppError>));
                (records, paginator)
            }))
        })
        .try_flatten()
    }
}
