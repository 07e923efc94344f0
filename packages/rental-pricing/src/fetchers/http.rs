//! Plain HTTP page fetcher.
//!
//! Fetches the served HTML without rendering. Suitable for sites that
//! embed listing data in the initial response; ready-selector hints are
//! ignored.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{DocumentSnapshot, FetchOptions, PageFetcher};

/// HTTP fetcher backed by `reqwest`.
///
/// # Example
///
/// ```rust,ignore
/// use rental_pricing::fetchers::{FetcherExt, HttpFetcher};
///
/// let fetcher = HttpFetcher::new().rate_limited(2);
/// ```
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Create a new HTTP fetcher with default settings.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) RentalPricing/0.1".to_string(),
        }
    }

    /// Set a custom user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set a custom HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<DocumentSnapshot> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        if let Some(selector) = &options.ready_selector {
            debug!(url = %url, selector = %selector, "Ready selector ignored by HTTP fetcher");
        }

        let response = self
            .client
            .get(parsed)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::timeout(url)
                } else {
                    warn!(url = %url, error = %e, "HTTP request failed");
                    FetchError::navigation(url, e)
                }
            })?;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::navigation(url, format!("HTTP {status}")));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url)
            } else {
                FetchError::navigation(url, e)
            }
        })?;

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "HTTP fetch complete");

        Ok(DocumentSnapshot::new(url, body)
            .with_final_url(final_url)
            .with_status(status.as_u16()))
    }

    fn name(&self) -> &str {
        "http"
    }
}
