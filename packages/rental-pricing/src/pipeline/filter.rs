//! Catalog filter - inner join of listings against the catalog.

use crate::error::{SchemaError, SchemaResult};
use crate::traits::extractor::{ExtractContext, RawRecord};
use crate::types::catalog::Catalog;
use crate::types::listing::Listing;

/// Listings split by catalog membership.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Listings whose (make, model, year) is in the catalog
    pub kept: Vec<Listing>,

    /// Listings outside the catalog
    pub rejected: Vec<Listing>,
}

/// Joins listings with the catalog on uppercased (make, model, year).
#[derive(Debug, Clone, Copy)]
pub struct CatalogFilter<'a> {
    catalog: &'a Catalog,
}

impl<'a> CatalogFilter<'a> {
    /// Create a filter over a catalog.
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Check that a page's records can be joined at all.
    ///
    /// Fails when a join column is absent from every record and the
    /// request context cannot supply it. Year always has to come from
    /// the records. An empty page passes.
    pub fn check_shape(records: &[RawRecord], context: &ExtractContext) -> SchemaResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let absent = |column: &str| !records.iter().any(|r| r.has(column));
        let mut missing = Vec::new();
        if absent("make") && context.make.is_none() {
            missing.push("make");
        }
        if absent("model") && context.model.is_none() {
            missing.push("model");
        }
        if absent("year") {
            missing.push("year");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::MissingJoinColumns { missing })
        }
    }

    /// Whether a listing joins with a catalog entry.
    pub fn matches(&self, listing: &Listing) -> bool {
        self.catalog
            .contains(&listing.make, &listing.model, listing.year)
    }

    /// Split listings into catalog matches and rejects, keeping order.
    pub fn apply(&self, listings: Vec<Listing>) -> FilterOutcome {
        let (kept, rejected) = listings.into_iter().partition(|l| self.matches(l));
        FilterOutcome { kept, rejected }
    }
}
