//! One pipeline run for one source.
//!
//! list pages → listings → primary detail pass → backfill pass →
//! dedup → assembled table, with every skip and failure in the
//! diagnostics log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::assemble::ResultAssembler;
use crate::pipeline::dedup::Deduplicator;
use crate::pipeline::diagnostics::{self, EventKind, LogEntry};
use crate::pipeline::fetch::{ConcurrentDetailFetcher, IssuedKeys};
use crate::pipeline::listings::{listing_jobs, ListingStage};
use crate::pipeline::normalize::ListingNormalizer;
use crate::pipeline::reconcile::{DurationCoverageReconciler, MissingBuckets};
use crate::sources::Source;
use crate::types::catalog::Catalog;
use crate::types::config::PipelineConfig;
use crate::types::output::OutputTable;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// List pages requested
    pub list_pages: usize,

    /// Catalog-matched listings before key dedup
    pub listings_loaded: usize,

    /// Listings kept after key dedup
    pub listings_retained: usize,

    /// Primary detail requests
    pub detail_requests: usize,

    /// Alternate requests issued by the backfill pass
    pub backfill_requests: usize,

    /// Listings whose primary request failed or came back empty
    pub broken_listings: usize,

    /// Listings with buckets still unmet after backfill
    pub incomplete_listings: usize,

    /// Detail records dropped as content duplicates
    pub duplicates_dropped: usize,

    /// Rows in the output table
    pub rows: usize,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub table: OutputTable,
    pub missing: Vec<MissingBuckets>,
    pub diagnostics: Vec<LogEntry>,
    pub summary: RunSummary,
}

impl RunReport {
    /// Diagnostics rendered as operator log lines.
    pub fn log_lines(&self) -> Vec<String> {
        self.diagnostics.iter().map(ToString::to_string).collect()
    }
}

/// Run the full pipeline for one source over a catalog.
///
/// Per-page and per-request failures never abort the run; they end up in
/// the diagnostics log and the table carries whatever was retrieved.
pub async fn run_pipeline(
    source: &Source,
    catalog: &Catalog,
    config: &PipelineConfig,
) -> Result<RunReport> {
    let profile = &source.profile;
    let run_id = Uuid::now_v7();
    let started_at = Utc::now();
    let (diag, log) = diagnostics::channel(profile.name.to_uppercase());
    let mut summary = RunSummary::default();

    info!(
        source = %profile.name,
        run_id = %run_id,
        catalog_entries = catalog.len(),
        concurrency = config.concurrency,
        "Pipeline run starting"
    );

    let normalizer = ListingNormalizer::for_profile(profile);
    let issued = IssuedKeys::new();

    // 1. List pages
    let jobs = listing_jobs(profile, catalog);
    summary.list_pages = jobs.len();
    let listings = ListingStage::new(
        source.fetcher.as_ref(),
        source.listing_extractor.as_ref(),
        &normalizer,
        catalog,
        diag.clone(),
        config,
    )
    .with_ready_selector(profile.list_ready_selector.clone())
    .run(jobs)
    .await;
    summary.listings_loaded = listings.len();

    // 2. Primary detail pass
    let scheduler = ConcurrentDetailFetcher::new(
        source.fetcher.as_ref(),
        source.detail_extractor.as_ref(),
        &issued,
        diag.clone(),
        config,
    )
    .with_source(profile.name.clone())
    .with_ready_selector(profile.detail_ready_selector.clone());

    let admission = scheduler.admit(listings, &normalizer);
    summary.listings_retained = admission.retained.len();
    summary.detail_requests = admission.requests.len();
    let mut outcomes = scheduler.run(admission.requests).await;
    summary.broken_listings = outcomes.iter().filter(|o| o.status.is_broken()).count();

    // 3. Single backfill pass
    let reconciler = DurationCoverageReconciler::new(profile, &issued, diag.clone());
    if config.backfill {
        let alternates = reconciler.plan(&admission.retained, &outcomes);
        summary.backfill_requests = alternates.len();
        if !alternates.is_empty() {
            info!(source = %profile.name, requests = alternates.len(), "Running backfill pass");
            outcomes.extend(scheduler.run(alternates).await);
        }
    }
    let missing = reconciler.finalize(&admission.retained, &outcomes);
    summary.incomplete_listings = missing.len();

    // 4. Dedup and assemble
    let mut dedup = Deduplicator::new();
    let records = dedup.dedup(outcomes.into_iter().flat_map(|o| o.records));
    summary.duplicates_dropped = dedup.dropped();

    let table = ResultAssembler::new(profile, diag.clone()).assemble(&admission.retained, records);
    summary.rows = table.len();

    diag.emit(
        EventKind::RunCompleted,
        format!(
            "{} rows for {} listing(s); {} backfill request(s), {} incomplete",
            summary.rows,
            summary.listings_retained,
            summary.backfill_requests,
            summary.incomplete_listings
        ),
    );

    drop(scheduler);
    drop(reconciler);
    drop(diag);
    let diagnostics = log.finish().await?;

    info!(
        source = %profile.name,
        run_id = %run_id,
        rows = summary.rows,
        events = diagnostics.len(),
        "Pipeline run complete"
    );

    Ok(RunReport {
        source: profile.name.clone(),
        run_id,
        started_at,
        finished_at: Utc::now(),
        table,
        missing,
        diagnostics,
        summary,
    })
}
