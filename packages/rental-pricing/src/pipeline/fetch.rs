//! Concurrent detail fetching with a fixed admission limit.
//!
//! Every detail request waits for one of K permits before its page is
//! loaded and keeps the permit until extraction finishes, so at most K
//! rendering sessions exist at any time. A request that times out or
//! fails resolves on its own; siblings keep running.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::FetchError;
use crate::pipeline::diagnostics::{DiagnosticsHandle, EventKind};
use crate::pipeline::normalize::ListingNormalizer;
use crate::traits::extractor::{ExtractContext, RecordExtractor};
use crate::traits::fetcher::{FetchOptions, PageFetcher};
use crate::types::config::PipelineConfig;
use crate::types::detail::{
    DetailOutcome, DetailRecord, DetailRequest, DetailStatus, RequestKey, RequestOrigin,
};
use crate::types::listing::{Listing, LookupKey};

#[derive(Debug, Default)]
struct Issued {
    listings: HashSet<LookupKey>,
    requests: HashSet<RequestKey>,
}

/// Keys already issued during a run.
///
/// Check and insert happen under one lock, so two tasks can never both
/// claim the same key.
#[derive(Debug, Default)]
pub struct IssuedKeys {
    inner: Mutex<Issued>,
}

impl IssuedKeys {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Issued> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a listing and its primary request. False if the listing was
    /// already claimed.
    pub fn claim_listing(&self, request: &DetailRequest) -> bool {
        let mut issued = self.lock();
        if !issued.listings.insert(request.listing_key.clone()) {
            return false;
        }
        issued.requests.insert(request.request_key());
        true
    }

    /// Claim a request key. False if it was already issued.
    pub fn claim_request(&self, key: &RequestKey) -> bool {
        self.lock().requests.insert(key.clone())
    }

    /// Number of distinct requests issued.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

/// Listings admitted for detail fetching.
#[derive(Debug, Default)]
pub struct Admission {
    /// First listing per lookup key, in input order
    pub retained: Vec<Listing>,

    /// One primary request per retained listing
    pub requests: Vec<DetailRequest>,

    /// Listings dropped because their key was already issued
    pub duplicates: usize,
}

/// Bounded-concurrency detail scheduler.
pub struct ConcurrentDetailFetcher<'a> {
    fetcher: &'a dyn PageFetcher,
    extractor: &'a dyn RecordExtractor,
    issued: &'a IssuedKeys,
    diagnostics: DiagnosticsHandle,
    source: String,
    options: FetchOptions,
    settle_delay: Duration,
    semaphore: Semaphore,
    concurrency: usize,
}

impl<'a> ConcurrentDetailFetcher<'a> {
    /// Create a scheduler with K = `config.concurrency`.
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        extractor: &'a dyn RecordExtractor,
        issued: &'a IssuedKeys,
        diagnostics: DiagnosticsHandle,
        config: &PipelineConfig,
    ) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            fetcher,
            extractor,
            issued,
            diagnostics,
            source: String::new(),
            options: FetchOptions::new(config.page_timeout),
            settle_delay: config.settle_delay,
            semaphore: Semaphore::new(concurrency),
            concurrency,
        }
    }

    /// Set the source name passed to the extractor.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the detail page ready selector hint.
    pub fn with_ready_selector(mut self, selector: Option<String>) -> Self {
        self.options.ready_selector = selector;
        self
    }

    /// Admission limit K.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Turn listings into primary requests, skipping keys already issued.
    pub fn admit(&self, listings: Vec<Listing>, normalizer: &ListingNormalizer) -> Admission {
        let mut admission = Admission::default();

        for listing in listings {
            let request = DetailRequest {
                listing_key: listing.key.clone(),
                source_url: listing.source_url.clone(),
                contract_type: listing.contract_type,
                duration_hint: normalizer.duration_of(&listing.source_url),
                origin: RequestOrigin::Primary,
            };

            if self.issued.claim_listing(&request) {
                admission.requests.push(request);
                admission.retained.push(listing);
            } else {
                admission.duplicates += 1;
                self.diagnostics.emit(
                    EventKind::DuplicateSkipped,
                    format!("Duplicate listing skipped: {} ({})", listing.key, listing.source_url),
                );
            }
        }

        admission
    }

    /// Resolve every request. Output order follows input order.
    pub async fn run(&self, requests: Vec<DetailRequest>) -> Vec<DetailOutcome> {
        debug!(requests = requests.len(), concurrency = self.concurrency, "Fetching detail pages");
        join_all(requests.into_iter().map(|r| self.fetch_one(r))).await
    }

    async fn fetch_one(&self, request: DetailRequest) -> DetailOutcome {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => return self.resolve(request, DetailStatus::Failed(e.to_string()), Vec::new()),
        };

        self.fetcher.ready().await;
        let url = request.source_url.clone();
        let loaded =
            tokio::time::timeout(self.options.timeout, self.fetcher.fetch(&url, &self.options))
                .await;

        let snapshot = match loaded {
            Ok(Ok(snapshot)) => snapshot,
            Err(_) | Ok(Err(FetchError::Timeout { .. })) => {
                return self.resolve(request, DetailStatus::TimedOut, Vec::new());
            }
            Ok(Err(e)) => return self.resolve(request, DetailStatus::Failed(e.to_string()), Vec::new()),
        };

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        if snapshot.is_not_found() {
            return self.resolve(request, DetailStatus::NotFound, Vec::new());
        }

        let context = ExtractContext::detail(self.source.clone(), request.contract_type);
        let raw = self.extractor.extract(&snapshot, &context);
        if !raw.is_empty() && raw.iter().all(|r| r.is_not_found()) {
            return self.resolve(request, DetailStatus::NotFound, Vec::new());
        }

        let records: Vec<DetailRecord> = raw
            .iter()
            .filter(|r| !r.is_not_found())
            .filter_map(|r| match DetailRecord::from_raw(&request.listing_key, &url, r) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(url = %url, error = %e, "Detail record rejected");
                    None
                }
            })
            .collect();

        let status = if records.is_empty() {
            DetailStatus::Empty
        } else {
            DetailStatus::Fetched
        };
        self.resolve(request, status, records)
    }

    fn resolve(
        &self,
        request: DetailRequest,
        status: DetailStatus,
        records: Vec<DetailRecord>,
    ) -> DetailOutcome {
        let label = match &request.origin {
            RequestOrigin::Primary => String::new(),
            RequestOrigin::Backfill { bucket } => format!(" [backfill {bucket}]"),
        };
        let url = &request.source_url;

        match &status {
            DetailStatus::Fetched => self.diagnostics.emit(
                EventKind::DetailFetched,
                format!("Fetched {} detail record(s) from {url}{label}", records.len()),
            ),
            DetailStatus::Empty => self.diagnostics.emit(
                EventKind::DetailEmpty,
                format!("No detail records on {url}{label}"),
            ),
            DetailStatus::NotFound => self.diagnostics.emit(
                EventKind::DetailNotFound,
                format!("Detail page not found: {url}{label}"),
            ),
            DetailStatus::TimedOut => self.diagnostics.emit(
                EventKind::DetailTimeout,
                format!("Timed out after {:?}: {url}{label}", self.options.timeout),
            ),
            DetailStatus::Failed(reason) => self.diagnostics.emit(
                EventKind::DetailFailed,
                format!("Detail fetch failed for {url}{label}: {reason}"),
            ),
        }

        DetailOutcome {
            request,
            status,
            records,
        }
    }
}
