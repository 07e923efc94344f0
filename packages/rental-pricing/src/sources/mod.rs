//! Named sources and multi-source runs.
//!
//! A [`Source`] bundles a site profile with the fetcher and extractors that
//! know how to read that site. The [`SourceRegistry`] resolves the
//! comma-separated source selection a trigger passes in.

pub mod profile;
pub mod rules;

use indexmap::IndexMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::run::{run_pipeline, RunReport};
use crate::traits::extractor::RecordExtractor;
use crate::traits::fetcher::PageFetcher;
use crate::types::catalog::Catalog;
use crate::types::config::PipelineConfig;

pub use profile::{ListTemplate, SourceProfile, YangoWindow};
pub use rules::RowRule;

/// A site profile plus the collaborators that read the site.
#[derive(Clone)]
pub struct Source {
    pub profile: SourceProfile,
    pub fetcher: Arc<dyn PageFetcher>,
    pub listing_extractor: Arc<dyn RecordExtractor>,
    pub detail_extractor: Arc<dyn RecordExtractor>,
}

impl Source {
    /// Create a source using one extractor for list and detail pages.
    pub fn new(
        profile: SourceProfile,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn RecordExtractor>,
    ) -> Self {
        Self {
            profile,
            fetcher,
            listing_extractor: Arc::clone(&extractor),
            detail_extractor: extractor,
        }
    }

    /// Use a separate extractor for detail pages.
    pub fn with_detail_extractor(mut self, extractor: Arc<dyn RecordExtractor>) -> Self {
        self.detail_extractor = extractor;
        self
    }

    /// Source name.
    pub fn name(&self) -> &str {
        &self.profile.name
    }

    /// Run the pipeline for this source.
    pub async fn run(&self, catalog: &Catalog, config: &PipelineConfig) -> Result<RunReport> {
        run_pipeline(self, catalog, config).await
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.profile.name)
            .field("fetcher", &self.fetcher.name())
            .field("listing_extractor", &self.listing_extractor.name())
            .field("detail_extractor", &self.detail_extractor.name())
            .finish()
    }
}

/// Sources by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: IndexMap<String, Source>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its profile name (case-insensitive).
    pub fn with_source(mut self, source: Source) -> Self {
        self.register(source);
        self
    }

    /// Register a source, replacing any source of the same name.
    pub fn register(&mut self, source: Source) {
        self.sources.insert(source.name().to_lowercase(), source);
    }

    /// Look up a source.
    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.get(&name.trim().to_lowercase())
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Resolve a comma-separated selection like `"yango, invygo"`.
    ///
    /// Returns the known sources (deduplicated, in selection order) and
    /// the unknown names. Blank entries are ignored.
    pub fn select(&self, selection: &str) -> (Vec<&Source>, Vec<String>) {
        let mut known: Vec<&Source> = Vec::new();
        let mut unknown = Vec::new();

        for name in selection.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match self.get(name) {
                Some(source) if !known.iter().any(|s| s.name() == source.name()) => known.push(source),
                Some(_) => {}
                None => unknown.push(name.to_string()),
            }
        }

        (known, unknown)
    }
}

/// Result of one source's run.
#[derive(Debug)]
pub enum SourceOutcome {
    Completed(Box<RunReport>),
    Failed(String),
}

/// Per-source success or failure, as a trigger reports it.
#[derive(Debug)]
pub struct SourceReport {
    pub source: String,
    pub outcome: SourceOutcome,
}

impl SourceReport {
    /// Whether the source ran to completion.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SourceOutcome::Completed(_))
    }

    /// The run report, if the source completed.
    pub fn report(&self) -> Option<&RunReport> {
        match &self.outcome {
            SourceOutcome::Completed(report) => Some(report.as_ref()),
            SourceOutcome::Failed(_) => None,
        }
    }
}

/// Run every selected source, one after another.
///
/// Reports come back in selection order. Unknown names are reported as
/// failed entries. Each source loads the catalog with its own alias
/// column; a catalog that cannot be loaded fails that source only. Fails
/// with [`PipelineError::NoSourceSelected`] when the selection names no
/// registered source.
pub async fn run_sources(
    registry: &SourceRegistry,
    selection: &str,
    catalog_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<Vec<SourceReport>> {
    let (sources, _) = registry.select(selection);
    if sources.is_empty() {
        warn!(selection = %selection, "No valid source selected");
        return Err(PipelineError::NoSourceSelected);
    }

    let mut reports: Vec<SourceReport> = Vec::new();
    let mut ran: Vec<&str> = Vec::new();

    for name in selection.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let Some(source) = registry.get(name) else {
            warn!(source = %name, "Ignoring unknown source");
            let reason = PipelineError::UnknownSource {
                name: name.to_string(),
            }
            .to_string();
            reports.push(SourceReport {
                source: name.to_string(),
                outcome: SourceOutcome::Failed(reason),
            });
            continue;
        };
        if ran.contains(&source.name()) {
            continue;
        }
        ran.push(source.name());

        let outcome = match run_one(source, catalog_path.as_ref(), config).await {
            Ok(report) => {
                info!(source = %source.name(), rows = report.table.len(), "Source completed");
                SourceOutcome::Completed(Box::new(report))
            }
            Err(e) => {
                error!(source = %source.name(), error = %e, "Source failed");
                SourceOutcome::Failed(e.to_string())
            }
        };
        reports.push(SourceReport {
            source: source.name().to_string(),
            outcome,
        });
    }

    Ok(reports)
}

async fn run_one(source: &Source, catalog_path: &Path, config: &PipelineConfig) -> Result<RunReport> {
    let catalog = Catalog::from_csv_path(catalog_path, &source.profile.alias_column)?;
    source.run(&catalog, config).await
}
