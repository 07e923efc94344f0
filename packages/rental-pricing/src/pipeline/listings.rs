//! Listing stage - list pages to catalog-filtered listings.

use futures::stream::{self, StreamExt};
use std::time::Duration;

use crate::error::FetchError;
use crate::pipeline::diagnostics::{DiagnosticsHandle, EventKind};
use crate::pipeline::filter::CatalogFilter;
use crate::pipeline::normalize::ListingNormalizer;
use crate::sources::profile::SourceProfile;
use crate::traits::extractor::{ExtractContext, RawRecord, RecordExtractor};
use crate::traits::fetcher::{DocumentSnapshot, FetchOptions, PageFetcher};
use crate::types::catalog::Catalog;
use crate::types::config::PipelineConfig;
use crate::types::listing::Listing;

/// One list page to load.
#[derive(Debug, Clone)]
pub struct ListingJob {
    /// Rendered list page URL
    pub url: String,

    /// Extraction context (contract type, catalog target)
    pub context: ExtractContext,

    /// Diagnostics context label, e.g. `TOYOTA-CAMRY`
    pub label: String,
}

/// Render every list page a run has to load.
///
/// Per-target templates are rendered once per deduplicated (make, model)
/// catalog target; catalog-wide templates once.
pub fn listing_jobs(profile: &SourceProfile, catalog: &Catalog) -> Vec<ListingJob> {
    let targets = catalog.scrape_targets();
    let mut jobs = Vec::new();

    for template in &profile.list_pages {
        let base = ExtractContext::listing(profile.name.clone(), template.contract_type);
        if template.is_per_target() {
            for target in &targets {
                jobs.push(ListingJob {
                    url: template.render(Some(target), &profile.vars),
                    context: base.clone().for_target(target.make.clone(), target.model.clone()),
                    label: format!("{}-{}", target.make, target.model).to_uppercase(),
                });
            }
        } else {
            jobs.push(ListingJob {
                url: template.render(None, &profile.vars),
                context: base,
                label: template.contract_type.as_str().to_uppercase(),
            });
        }
    }

    jobs
}

/// Loads list pages with at most K in flight, then normalizes and filters.
pub struct ListingStage<'a> {
    fetcher: &'a dyn PageFetcher,
    extractor: &'a dyn RecordExtractor,
    normalizer: &'a ListingNormalizer,
    filter: CatalogFilter<'a>,
    diagnostics: DiagnosticsHandle,
    options: FetchOptions,
    settle_delay: Duration,
    concurrency: usize,
}

impl<'a> ListingStage<'a> {
    /// Create the stage for one run.
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        extractor: &'a dyn RecordExtractor,
        normalizer: &'a ListingNormalizer,
        catalog: &'a Catalog,
        diagnostics: DiagnosticsHandle,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            normalizer,
            filter: CatalogFilter::new(catalog),
            diagnostics,
            options: FetchOptions::new(config.page_timeout),
            settle_delay: config.settle_delay,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Set the list page ready selector hint.
    pub fn with_ready_selector(mut self, selector: Option<String>) -> Self {
        self.options.ready_selector = selector;
        self
    }

    /// Load every job. Listings come back in job order.
    pub async fn run(&self, jobs: Vec<ListingJob>) -> Vec<Listing> {
        let pages: Vec<Vec<Listing>> = stream::iter(jobs)
            .map(|job| self.load(job))
            .buffered(self.concurrency)
            .collect()
            .await;
        pages.into_iter().flatten().collect()
    }

    async fn load(&self, job: ListingJob) -> Vec<Listing> {
        let diag = self.diagnostics.with_context(&job.label);
        let url = job.url.as_str();

        self.fetcher.ready().await;
        let loaded =
            tokio::time::timeout(self.options.timeout, self.fetcher.fetch(url, &self.options)).await;
        let (snapshot, partial) = match loaded {
            Ok(Ok(snapshot)) => (snapshot, false),
            Ok(Err(FetchError::Timeout {
                partial: Some(snapshot),
                ..
            })) => {
                diag.emit(
                    EventKind::ListingTimeout,
                    format!("List page timed out, keeping partial results: {url}"),
                );
                (*snapshot, true)
            }
            Err(_) | Ok(Err(FetchError::Timeout { .. })) => {
                diag.emit(EventKind::ListingTimeout, format!("List page timed out: {url}"));
                return Vec::new();
            }
            Ok(Err(e)) => {
                diag.emit(EventKind::ListingPageFailed, format!("List page failed: {e}"));
                return Vec::new();
            }
        };

        if !partial && !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let Some(records) = self.page_records(&snapshot, &job, &diag) else {
            return Vec::new();
        };

        let mut listings = Vec::with_capacity(records.len());
        for raw in &records {
            match self.normalizer.normalize(raw, &job.context) {
                Ok(listing) if partial => listings.push(listing.into_partial()),
                Ok(listing) => listings.push(listing),
                Err(e) => diag.emit(
                    EventKind::InvalidListing,
                    format!("Listing dropped ({e}): {}", raw.text("sub-url").unwrap_or_default()),
                ),
            }
        }

        let outcome = self.filter.apply(listings);
        if !outcome.rejected.is_empty() {
            diag.emit(
                EventKind::NoCatalogMatch,
                format!("{} listing(s) not in the catalog on {url}", outcome.rejected.len()),
            );
        }
        diag.emit(
            EventKind::ListingsLoaded,
            format!(
                "{} {} listing(s) loaded from {url}{}",
                outcome.kept.len(),
                job.context.contract_type,
                if partial { " (partial)" } else { "" }
            ),
        );

        outcome.kept
    }

    /// Extract and validate a page's records; None when the page is
    /// unusable (not found, schema drift).
    fn page_records(
        &self,
        snapshot: &DocumentSnapshot,
        job: &ListingJob,
        diag: &DiagnosticsHandle,
    ) -> Option<Vec<RawRecord>> {
        if snapshot.is_not_found() {
            diag.emit(EventKind::ListingPageNotFound, format!("List page not found: {}", job.url));
            return None;
        }

        let raw = self.extractor.extract(snapshot, &job.context);
        if !raw.is_empty() && raw.iter().all(RawRecord::is_not_found) {
            diag.emit(EventKind::ListingPageNotFound, format!("No results on {}", job.url));
            return None;
        }

        let records: Vec<RawRecord> = raw.into_iter().filter(|r| !r.is_not_found()).collect();
        if let Err(e) = CatalogFilter::check_shape(&records, &job.context) {
            diag.emit(EventKind::SchemaMismatch, format!("Skipping {}: {e}", job.url));
            return None;
        }

        Some(records)
    }
}
