//! Rate-limited fetcher wrapper.
//!
//! Wraps any PageFetcher with a request quota using the governor crate.
//! The quota spaces out page loads against one site; the pipeline's
//! concurrency limit still bounds how many are in flight.
//!
//! The wait happens in [`PageFetcher::ready`], outside the page deadline.
//! Each `ready` call reserves one cell that the next `fetch` consumes; a
//! `fetch` without a reservation waits for the quota itself.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::FetchResult;
use crate::traits::fetcher::{DocumentSnapshot, FetchOptions, PageFetcher};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

/// A fetcher wrapper that enforces a request quota.
pub struct RateLimitedFetcher<F: PageFetcher> {
    inner: F,
    limiter: Arc<DefaultRateLimiter>,
    reserved: AtomicUsize,
}

impl<F: PageFetcher> RateLimitedFetcher<F> {
    /// Create a new rate-limited fetcher.
    ///
    /// A rate of zero is treated as one request per second.
    pub fn new(fetcher: F, requests_per_second: u32) -> Self {
        Self::with_quota(fetcher, Quota::per_second(non_zero(requests_per_second)))
    }

    /// Create with a custom quota.
    pub fn with_quota(fetcher: F, quota: Quota) -> Self {
        Self {
            inner: fetcher,
            limiter: Arc::new(RateLimiter::direct(quota)),
            reserved: AtomicUsize::new(0),
        }
    }

    /// Create with burst support.
    pub fn with_burst(fetcher: F, requests_per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(non_zero(requests_per_second)).allow_burst(non_zero(burst));
        Self::with_quota(fetcher, quota)
    }

    /// The wrapped fetcher.
    pub fn inner(&self) -> &F {
        &self.inner
    }

    fn take_reservation(&self) -> bool {
        self.reserved
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for RateLimitedFetcher<F> {
    async fn ready(&self) {
        self.limiter.until_ready().await;
        self.reserved.fetch_add(1, Ordering::SeqCst);
        self.inner.ready().await;
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult<DocumentSnapshot> {
        if !self.take_reservation() {
            self.limiter.until_ready().await;
        }
        self.inner.fetch(url, options).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

/// Extension trait for easy rate limiting.
pub trait FetcherExt: PageFetcher + Sized {
    /// Wrap this fetcher with rate limiting.
    fn rate_limited(self, requests_per_second: u32) -> RateLimitedFetcher<Self> {
        RateLimitedFetcher::new(self, requests_per_second)
    }

    /// Wrap with rate limiting and burst support.
    fn rate_limited_with_burst(self, requests_per_second: u32, burst: u32) -> RateLimitedFetcher<Self> {
        RateLimitedFetcher::with_burst(self, requests_per_second, burst)
    }
}

impl<F: PageFetcher + Sized> FetcherExt for F {}
