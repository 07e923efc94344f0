//! Output rows and the projected per-source table.

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::types::detail::{DetailRecord, SOURCE_URL};
use crate::types::listing::{ContractType, Listing, LookupKey};

/// Ordered column list of a source's output table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputSchema {
    columns: Vec<String>,
}

impl OutputSchema {
    /// Create a schema from column names.
    pub fn new(columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

/// One listing × duration-tier row. Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    /// Lookup key of the listing
    pub listing_key: LookupKey,

    /// URL shown in the `sub-url` column
    pub source_url: String,

    pub title: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub contract_type: ContractType,

    /// Listing came from a partially loaded page
    pub partial: bool,

    /// Duration text (bucket display label when collapsed)
    pub duration: Option<String>,

    pub base_price: Option<f64>,
    pub offered_price: Option<f64>,
    pub savings: Option<f64>,

    /// Extra listing attributes
    pub listing_attributes: IndexMap<String, Value>,

    /// Extra detail attributes
    pub detail_attributes: IndexMap<String, Value>,
}

impl OutputRow {
    /// Join a listing with one of its detail records, or with none.
    ///
    /// A detail page that states its own contract cadence overrides the
    /// listing's, and its URL replaces the listing URL.
    pub fn join(listing: &Listing, detail: Option<&DetailRecord>) -> Self {
        let contract_type = detail
            .and_then(|d| d.ancillary.get("contract"))
            .and_then(Value::as_str)
            .and_then(|c| c.parse::<ContractType>().ok())
            .unwrap_or(listing.contract_type);

        Self {
            listing_key: listing.key.clone(),
            source_url: detail.map_or_else(|| listing.source_url.clone(), |d| d.source_url.clone()),
            title: listing.title(),
            make: listing.make.clone(),
            model: listing.model.clone(),
            year: listing.year,
            contract_type,
            partial: listing.partial,
            duration: detail.and_then(|d| d.duration.clone()),
            base_price: detail.and_then(|d| d.base_price),
            offered_price: detail.and_then(|d| d.offered_price),
            savings: detail.and_then(|d| d.savings),
            listing_attributes: listing.attributes.clone(),
            detail_attributes: detail.map(|d| d.ancillary.clone()).unwrap_or_default(),
        }
    }

    /// Whether the row carries contract data from a detail page.
    pub fn has_contract_data(&self) -> bool {
        self.duration.is_some()
            || self.base_price.is_some()
            || self.offered_price.is_some()
            || !self.detail_attributes.is_empty()
    }

    /// Value of a column; unknown columns read as null.
    ///
    /// Detail attributes shadow listing attributes of the same name.
    pub fn value(&self, column: &str) -> Value {
        match column {
            SOURCE_URL => Value::from(self.source_url.clone()),
            "title" => Value::from(self.title.clone()),
            "make" => Value::from(self.make.clone()),
            "model" => Value::from(self.model.clone()),
            "year" => Value::from(self.year),
            "contract" => Value::from(self.contract_type.as_str()),
            "partial" => Value::from(self.partial),
            "duration" => self.duration.clone().map_or(Value::Null, Value::from),
            "base_price" => self.base_price.map_or(Value::Null, Value::from),
            "offered_price" => self.offered_price.map_or(Value::Null, Value::from),
            "savings" => self.savings.map_or(Value::Null, Value::from),
            other => self
                .detail_attributes
                .get(other)
                .or_else(|| self.listing_attributes.get(other))
                .cloned()
                .unwrap_or(Value::Null),
        }
    }

    /// Project the row onto a schema.
    pub fn project(&self, schema: &OutputSchema) -> IndexMap<String, Value> {
        schema
            .columns()
            .iter()
            .map(|c| (c.clone(), self.value(c)))
            .collect()
    }
}

/// A finished, sorted table for one source.
#[derive(Debug, Clone)]
pub struct OutputTable {
    pub schema: OutputSchema,
    pub rows: Vec<OutputRow>,
}

impl OutputTable {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows projected onto the schema, in table order.
    pub fn records(&self) -> impl Iterator<Item = IndexMap<String, Value>> + '_ {
        self.rows.iter().map(|r| r.project(&self.schema))
    }

    /// Rows of one listing, in table order.
    pub fn rows_for<'a>(&'a self, key: &'a LookupKey) -> impl Iterator<Item = &'a OutputRow> + 'a {
        self.rows.iter().filter(move |r| &r.listing_key == key)
    }
}

impl Serialize for OutputTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.records())
    }
}
