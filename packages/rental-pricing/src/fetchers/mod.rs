//! Page fetcher implementations.
//!
//! - `HttpFetcher` - plain HTTP via reqwest
//! - `RateLimitedFetcher` - request quota in front of any fetcher
//! - `MockFetcher` - for testing (in [`crate::testing`])
//!
//! Browser-rendering fetchers live outside this crate and plug in through
//! the [`PageFetcher`] trait.

mod http;
mod rate_limited;

pub use http::HttpFetcher;
pub use rate_limited::{FetcherExt, RateLimitedFetcher};

pub use crate::traits::fetcher::{DocumentSnapshot, FetchOptions, PageFetcher};
