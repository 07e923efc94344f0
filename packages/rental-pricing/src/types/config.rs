//! Run configuration for the pricing pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every stage of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of in-flight page fetches (rendering sessions).
    ///
    /// Default: 5.
    pub concurrency: usize,

    /// Per-page deadline for the page to become ready.
    ///
    /// Default: 10 seconds.
    pub page_timeout: Duration,

    /// Fixed wait after a page loads, for dynamic content to render.
    ///
    /// Held inside the admission slot. Default: none.
    pub settle_delay: Duration,

    /// Run the single backfill pass for missing duration buckets.
    ///
    /// Default: true.
    pub backfill: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            page_timeout: Duration::from_secs(10),
            settle_delay: Duration::ZERO,
            backfill: true,
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from the environment (and a `.env` file if present).
    ///
    /// Reads `RENTAL_CONCURRENCY`, `RENTAL_PAGE_TIMEOUT_MS` and
    /// `RENTAL_SETTLE_DELAY_MS`; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        fn var<T: std::str::FromStr>(name: &str) -> Option<T> {
            std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
        }

        let mut config = Self::default();
        if let Some(k) = var::<usize>("RENTAL_CONCURRENCY") {
            config = config.with_concurrency(k);
        }
        if let Some(ms) = var::<u64>("RENTAL_PAGE_TIMEOUT_MS") {
            config.page_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = var::<u64>("RENTAL_SETTLE_DELAY_MS") {
            config.settle_delay = Duration::from_millis(ms);
        }
        config
    }

    /// Set the concurrency limit (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the per-page timeout.
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Set the settle delay.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Disable the backfill pass.
    pub fn without_backfill(mut self) -> Self {
        self.backfill = false;
        self
    }
}
