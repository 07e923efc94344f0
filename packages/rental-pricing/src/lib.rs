//! Car-Rental Pricing Reconciliation Library
//!
//! Collects time-bounded rental prices from rental marketplaces for a fixed
//! catalog of make/model/year combinations and emits one denormalized
//! pricing table per source.
//!
//! # How a run works
//!
//! - List pages are loaded per catalog target and contract type
//! - Listings are canonicalized (lookup keys ignore the duration selector)
//!   and inner-joined with the catalog
//! - Detail pages are fetched with at most K in flight
//! - Monthly listings missing duration buckets get one backfill pass
//! - Detail rows are deduplicated, joined back to listings, sorted and
//!   projected onto the source's column schema
//!
//! Page rendering and markup extraction are supplied by the caller through
//! [`PageFetcher`] and [`RecordExtractor`].
//!
//! # Usage
//!
//! ```rust,ignore
//! use rental_pricing::{run_sources, PipelineConfig, Source, SourceProfile, SourceRegistry};
//! use std::sync::Arc;
//!
//! let registry = SourceRegistry::new()
//!     .with_source(Source::new(SourceProfile::invygo(), fetcher, extractor));
//!
//! let config = PipelineConfig::from_env();
//! for report in run_sources(&registry, "invygo", "catalog.csv", &config).await? {
//!     println!("{}: {}", report.source, report.is_success());
//! }
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Collaborator traits (PageFetcher, RecordExtractor)
//! - [`types`] - Listings, detail records, duration buckets, output rows
//! - [`pipeline`] - The reconciliation stages and the diagnostics log
//! - [`sources`] - Site profiles, registry and multi-source runs
//! - [`fetchers`] - HTTP and rate-limited fetchers
//! - [`extractors`] - JSON record extractor
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod extractors;
pub mod fetchers;
pub mod pipeline;
pub mod sources;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{ConfigLoadError, FetchError, PipelineError, SchemaError, UrlError};
pub use pipeline::{
    diagnostics::{EventKind, LogEntry, Severity},
    reconcile::MissingBuckets,
    run::{run_pipeline, RunReport, RunSummary},
};
pub use sources::{run_sources, Source, SourceOutcome, SourceProfile, SourceRegistry, SourceReport};
pub use traits::{
    extractor::{ExtractContext, PageKind, RawRecord, RecordExtractor},
    fetcher::{DocumentSnapshot, FetchOptions, PageFetcher},
};
pub use types::{
    catalog::{Catalog, CatalogEntry, ScrapeTarget},
    config::PipelineConfig,
    detail::{DetailOutcome, DetailRecord, DetailRequest, DetailStatus, RequestKey, RequestOrigin},
    duration::{BucketPlacement, DurationBucket, DurationPartition},
    listing::{ContractType, Listing, LookupKey},
    output::{OutputRow, OutputSchema, OutputTable},
};
