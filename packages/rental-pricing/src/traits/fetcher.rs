//! Page fetcher trait and the document snapshot it produces.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::FetchResult;

/// A rendered document captured from a page.
///
/// This is the only thing the pipeline sees of a page: site-specific
/// extraction works on the snapshot, never on a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    /// URL that was requested
    pub url: String,

    /// URL after redirects (same as `url` when none happened)
    pub final_url: String,

    /// HTTP status of the main document, when known
    pub status: Option<u16>,

    /// Rendered document body (HTML, or JSON for API-backed pages)
    pub body: String,

    /// When the snapshot was taken
    pub captured_at: DateTime<Utc>,
}

impl DocumentSnapshot {
    /// Create a snapshot with status 200 captured now.
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: Some(200),
            body: body.into(),
            captured_at: Utc::now(),
        }
    }

    /// Set the final URL after redirects.
    pub fn with_final_url(mut self, final_url: impl Into<String>) -> Self {
        self.final_url = final_url.into();
        self
    }

    /// Set the HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the server answered "not found".
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Check if this snapshot has content.
    pub fn has_content(&self) -> bool {
        !self.body.trim().is_empty()
    }
}

/// What the fetch should wait for before capturing the document.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Selector that must be present before the page counts as ready.
    /// Plain HTTP fetchers ignore it.
    pub ready_selector: Option<String>,

    /// Hard deadline for the page to become ready
    pub timeout: Duration,
}

impl FetchOptions {
    /// Create options with the given timeout and no ready selector.
    pub fn new(timeout: Duration) -> Self {
        Self {
            ready_selector: None,
            timeout,
        }
    }

    /// Set the ready selector hint.
    pub fn with_ready_selector(mut self, selector: impl Into<String>) -> Self {
        self.ready_selector = Some(selector.into());
        self
    }
}

/// Fetcher trait for retrieving rendered pages.
///
/// One call corresponds to one rendering session; the concurrency
/// limit of the detail fetcher is therefore also the session limit.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Wait until the fetcher may start another page load.
    ///
    /// Awaited before the page deadline starts, so throttling never eats
    /// into a page's timeout. The default is ready immediately.
    async fn ready(&self) {}

    /// Fetch and render a single page.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<DocumentSnapshot>;

    /// Get the fetcher name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<F: PageFetcher + ?Sized> PageFetcher for std::sync::Arc<F> {
    async fn ready(&self) {
        (**self).ready().await
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<DocumentSnapshot> {
        (**self).fetch(url, options).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
