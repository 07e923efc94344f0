//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the pricing pipeline without a browser
//! or network access. Pair [`MockFetcher`] with
//! [`JsonRecordExtractor`](crate::extractors::JsonRecordExtractor) and serve
//! JSON bodies as pages.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::error::{FetchError, FetchResult};
use crate::traits::fetcher::{DocumentSnapshot, FetchOptions, PageFetcher};

/// Record of a call made to the mock fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockFetcherCall {
    pub url: String,
    pub ready_selector: Option<String>,
}

/// A mock page fetcher serving canned snapshots by URL.
///
/// Unknown URLs answer with an empty 404 snapshot. Tracks every call and
/// the peak number of fetches in flight at once.
#[derive(Default, Clone)]
pub struct MockFetcher {
    /// Canned snapshots by URL
    pages: Arc<RwLock<HashMap<String, DocumentSnapshot>>>,

    /// URLs that never become ready, with an optional partial snapshot
    timeouts: Arc<RwLock<HashMap<String, Option<DocumentSnapshot>>>>,

    /// URLs that fail navigation
    failures: Arc<RwLock<HashSet<String>>>,

    /// Per-URL latency
    delays: Arc<RwLock<HashMap<String, Duration>>>,

    /// Latency for URLs without their own delay
    default_delay: Duration,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockFetcherCall>>>,

    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockFetcher {
    /// Create a new mock fetcher with no pages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a body at a URL.
    pub fn with_page(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        let snapshot = DocumentSnapshot::new(url.clone(), body);
        self.with_snapshot(url, snapshot)
    }

    /// Serve a prepared snapshot at a URL.
    pub fn with_snapshot(self, url: impl Into<String>, snapshot: DocumentSnapshot) -> Self {
        write(&self.pages).insert(url.into(), snapshot);
        self
    }

    /// Make a URL time out without producing anything.
    pub fn timeout_url(self, url: impl Into<String>) -> Self {
        write(&self.timeouts).insert(url.into(), None);
        self
    }

    /// Make a URL time out after part of the page has rendered.
    pub fn timeout_with_partial(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        let partial = DocumentSnapshot::new(url.clone(), body);
        write(&self.timeouts).insert(url, Some(partial));
        self
    }

    /// Make a URL fail navigation.
    pub fn fail_url(self, url: impl Into<String>) -> Self {
        write(&self.failures).insert(url.into());
        self
    }

    /// Add latency to one URL.
    pub fn with_delay(self, url: impl Into<String>, delay: Duration) -> Self {
        write(&self.delays).insert(url.into(), delay);
        self
    }

    /// Add latency to every URL without its own delay.
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockFetcherCall> {
        read(&self.calls).clone()
    }

    /// Number of fetches of one URL.
    pub fn call_count(&self, url: &str) -> usize {
        read(&self.calls).iter().filter(|c| c.url == url).count()
    }

    /// Highest number of fetches observed in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Decrements the in-flight counter even when the fetch is cancelled.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<DocumentSnapshot> {
        write(&self.calls).push(MockFetcherCall {
            url: url.to_string(),
            ready_selector: options.ready_selector.clone(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let delay = read(&self.delays)
            .get(url)
            .copied()
            .unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if read(&self.failures).contains(url) {
            return Err(FetchError::navigation(url, "connection refused"));
        }

        let timeout = read(&self.timeouts).get(url).cloned();
        if let Some(partial) = timeout {
            if partial.is_none() {
                tokio::time::sleep(options.timeout).await;
            }
            return Err(FetchError::Timeout {
                url: url.to_string(),
                partial: partial.map(Box::new),
            });
        }

        let page = read(&self.pages).get(url).cloned();
        Ok(page.unwrap_or_else(|| DocumentSnapshot::new(url, "").with_status(404)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> FetchOptions {
        FetchOptions::new(Duration::from_millis(20)).with_ready_selector("#Card")
    }

    #[tokio::test]
    async fn test_serves_pages_and_tracks_calls() {
        let fetcher = MockFetcher::new().with_page("https://a.test/1", "[]");

        let page = fetcher.fetch("https://a.test/1", &options()).await.unwrap();
        assert_eq!(page.body, "[]");

        let missing = fetcher.fetch("https://a.test/2", &options()).await.unwrap();
        assert!(missing.is_not_found());

        assert_eq!(fetcher.call_count("https://a.test/1"), 1);
        assert_eq!(fetcher.calls()[0].ready_selector.as_deref(), Some("#Card"));
    }

    #[tokio::test]
    async fn test_timeouts_and_failures() {
        let fetcher = MockFetcher::new()
            .timeout_url("https://a.test/slow")
            .timeout_with_partial("https://a.test/half", "[{}]")
            .fail_url("https://a.test/down");

        let slow = fetcher.fetch("https://a.test/slow", &options()).await;
        assert!(matches!(slow, Err(FetchError::Timeout { partial: None, .. })));

        let half = fetcher.fetch("https://a.test/half", &options()).await;
        assert!(matches!(half, Err(FetchError::Timeout { partial: Some(_), .. })));

        let down = fetcher.fetch("https://a.test/down", &options()).await;
        assert!(matches!(down, Err(FetchError::Navigation { .. })));
    }

    #[tokio::test]
    async fn test_peak_in_flight() {
        let fetcher = MockFetcher::new().with_default_delay(Duration::from_millis(10));
        let opts = options();
        let calls = (0..4).map(|i| {
            let fetcher = &fetcher;
            let opts = &opts;
            async move { fetcher.fetch(&format!("https://a.test/{i}"), opts).await }
        });
        futures::future::join_all(calls).await;
        assert_eq!(fetcher.peak_in_flight(), 4);
    }
}
