//! Record extractor trait: snapshot in, raw attribute records out.
//!
//! Extractors hold all site-specific markup knowledge. They are pure:
//! no I/O, no shared state, the same snapshot always yields the same
//! records.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::fetcher::DocumentSnapshot;
use crate::types::listing::ContractType;

/// Attribute name a record uses to report the page status.
pub const PAGE_STATUS: &str = "page_status";

/// Value of [`PAGE_STATUS`] for pages the site reports as missing.
pub const PAGE_NOT_FOUND: &str = "not found";

/// Which kind of page the snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// Search / list page producing listings
    Listing,
    /// Listing detail page producing pricing tiers
    Detail,
}

/// Context handed to an extractor alongside the snapshot.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    /// Source name (e.g. "yango")
    pub source: String,

    /// Page kind
    pub kind: PageKind,

    /// Contract type the page was requested for
    pub contract_type: ContractType,

    /// Catalog make the page was requested for, if any
    pub make: Option<String>,

    /// Catalog model alias the page was requested for, if any
    pub model: Option<String>,
}

impl ExtractContext {
    /// Context for a list page.
    pub fn listing(source: impl Into<String>, contract_type: ContractType) -> Self {
        Self {
            source: source.into(),
            kind: PageKind::Listing,
            contract_type,
            make: None,
            model: None,
        }
    }

    /// Scope the context to one catalog (make, model) target.
    pub fn for_target(mut self, make: impl Into<String>, model: impl Into<String>) -> Self {
        self.make = Some(make.into());
        self.model = Some(model.into());
        self
    }

    /// Context for a detail page.
    pub fn detail(source: impl Into<String>, contract_type: ContractType) -> Self {
        Self {
            source: source.into(),
            kind: PageKind::Detail,
            contract_type,
            make: None,
            model: None,
        }
    }
}

/// One loosely-typed record as produced by an extractor.
///
/// Typed validation happens downstream (`Listing::from_raw`,
/// `DetailRecord::from_raw`), so extractors stay free of pipeline rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    pub attributes: IndexMap<String, Value>,
}

impl RawRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute (builder style).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get an attribute.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Get an attribute as trimmed, non-empty text.
    ///
    /// Numbers are rendered as text so that `2023` and `"2023"` read alike.
    pub fn text(&self, key: &str) -> Option<String> {
        let text = match self.attributes.get(key)? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return None,
        };
        (!text.is_empty()).then_some(text)
    }

    /// Whether the key is present at all (even if null).
    pub fn has(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Whether this record is the site's "not found" marker.
    pub fn is_not_found(&self) -> bool {
        self.text(PAGE_STATUS)
            .is_some_and(|s| s.eq_ignore_ascii_case(PAGE_NOT_FOUND))
    }
}

impl From<IndexMap<String, Value>> for RawRecord {
    fn from(attributes: IndexMap<String, Value>) -> Self {
        Self { attributes }
    }
}

/// Extractor trait mapping a snapshot to raw records.
pub trait RecordExtractor: Send + Sync {
    /// Extract zero or more records from a snapshot.
    fn extract(&self, snapshot: &DocumentSnapshot, context: &ExtractContext) -> Vec<RawRecord>;

    /// Get the extractor name (for logging/debugging).
    fn name(&self) -> &str {
        "unknown"
    }
}

impl<E: RecordExtractor + ?Sized> RecordExtractor for std::sync::Arc<E> {
    fn extract(&self, snapshot: &DocumentSnapshot, context: &ExtractContext) -> Vec<RawRecord> {
        (**self).extract(snapshot, context)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
