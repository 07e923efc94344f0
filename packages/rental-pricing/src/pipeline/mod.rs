//! Reconciliation pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Listing stage (list pages → normalized, catalog-filtered listings)
//! - Bounded concurrent detail fetching with key dedup
//! - Duration coverage checks and the single backfill pass
//! - Content dedup of detail records
//! - Assembly into a sorted, schema-projected table
//! - The diagnostics log every stage reports into

pub mod assemble;
pub mod dedup;
pub mod diagnostics;
pub mod fetch;
pub mod filter;
pub mod listings;
pub mod normalize;
pub mod reconcile;
pub mod run;

pub use assemble::{compare_rows, ResultAssembler, SortKey};
pub use dedup::{dedup_records, Deduplicator};
pub use diagnostics::{DiagnosticsHandle, DiagnosticsLog, EventKind, LogEntry, Severity};
pub use fetch::{Admission, ConcurrentDetailFetcher, IssuedKeys};
pub use filter::{CatalogFilter, FilterOutcome};
pub use listings::{listing_jobs, ListingJob, ListingStage};
pub use normalize::{with_duration, ListingNormalizer};
pub use reconcile::{bucket_coverage, Coverage, DurationCoverageReconciler, MissingBuckets};
pub use run::{run_pipeline, RunReport, RunSummary};
