//! The make/model/year catalog that scopes every run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ConfigLoadError;

/// One allowed (make, model, year) triple.
///
/// `model` is the site-specific alias of the model name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub make: String,
    pub model: String,
    pub year: i32,
}

impl CatalogEntry {
    /// Create a catalog entry.
    pub fn new(make: impl Into<String>, model: impl Into<String>, year: i32) -> Self {
        Self {
            make: make.into(),
            model: model.into(),
            year,
        }
    }
}

/// A (make, model) pair whose list pages get scraped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScrapeTarget {
    pub make: String,
    pub model: String,
}

/// Read-only set of allowed catalog entries for one source.
///
/// Shared by reference across all concurrent tasks of a run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashSet<(String, String, i32)>,
}

impl Catalog {
    /// Build a catalog from entries.
    pub fn new(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let entries: Vec<CatalogEntry> = entries.into_iter().collect();
        let index = entries
            .iter()
            .map(|e| (join_case(&e.make), join_case(&e.model), e.year))
            .collect();
        Self { entries, index }
    }

    /// Load the catalog CSV at `path`, reading models from `alias_column`.
    pub fn from_csv_path(
        path: impl AsRef<Path>,
        alias_column: &str,
    ) -> Result<Self, ConfigLoadError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_csv_reader(file, alias_column)
    }

    /// Load a catalog from CSV with columns `make`, `year`, and `alias_column`.
    ///
    /// Rows with an empty alias are not offered by the site and are skipped.
    /// Rows whose year is not an integer are skipped with a warning.
    pub fn from_csv_reader<R: Read>(reader: R, alias_column: &str) -> Result<Self, ConfigLoadError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ConfigLoadError::MissingColumn {
                    column: name.to_string(),
                })
        };
        let make_idx = column("make")?;
        let year_idx = column("year")?;
        let model_idx = column(alias_column)?;

        let mut entries = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let make = record.get(make_idx).unwrap_or_default();
            let model = record.get(model_idx).unwrap_or_default();
            let year = record.get(year_idx).unwrap_or_default();

            if model.is_empty() || make.is_empty() {
                continue;
            }

            match parse_year(year) {
                Some(year) => entries.push(CatalogEntry::new(make, model, year)),
                None => warn!(line = line + 2, year = %year, "Skipping catalog row with invalid year"),
            }
        }

        debug!(entries = entries.len(), alias_column, "Catalog loaded");
        Ok(Self::new(entries))
    }

    /// All entries in file order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalog has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct (make, model) pairs in first-seen order.
    pub fn scrape_targets(&self) -> Vec<ScrapeTarget> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert((join_case(&e.make), join_case(&e.model))))
            .map(|e| ScrapeTarget {
                make: e.make.clone(),
                model: e.model.clone(),
            })
            .collect()
    }

    /// Case-insensitive membership test on (make, model, year).
    pub fn contains(&self, make: &str, model: &str, year: i32) -> bool {
        self.index
            .contains(&(join_case(make), join_case(model), year))
    }
}

/// Join-field normalization: trimmed and uppercased.
pub fn join_case(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Coerce a year to an integer, accepting "2023" and "2023.0".
pub fn parse_year(value: &str) -> Option<i32> {
    let value = value.trim();
    value.parse::<i32>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i32)
    })
}
