//! Detail types - requests for detail pages and the pricing tiers they yield.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{SchemaError, SchemaResult};
use crate::traits::extractor::{RawRecord, PAGE_STATUS};
use crate::types::listing::{ContractType, LookupKey};

/// Raw attribute holding the page URL a record was read from.
pub const SOURCE_URL: &str = "sub-url";

/// Why a detail request exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum RequestOrigin {
    /// First fetch of a filtered listing
    Primary,
    /// Synthesized to close a duration-bucket gap
    Backfill { bucket: String },
}

/// Identity of one issued request: the listing plus its duration selector.
///
/// Every backfill alternate shares its listing's lookup key, so the
/// duration value is what tells alternates apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub lookup: LookupKey,
    pub duration: Option<u32>,
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.duration {
            Some(d) => write!(f, "{}#duration={}", self.lookup, d),
            None => write!(f, "{}", self.lookup),
        }
    }
}

/// A request to fetch one detail page. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRequest {
    /// Lookup key of the listing this request belongs to
    pub listing_key: LookupKey,

    /// URL to fetch
    pub source_url: String,

    /// Contract cadence of the listing
    pub contract_type: ContractType,

    /// Duration selector value carried by `source_url`, if any
    pub duration_hint: Option<u32>,

    /// Primary or backfill
    pub origin: RequestOrigin,
}

impl DetailRequest {
    /// Request key used for duplicate suppression.
    pub fn request_key(&self) -> RequestKey {
        RequestKey {
            lookup: self.listing_key.clone(),
            duration: self.duration_hint,
        }
    }

    /// Whether this request was synthesized by the reconciler.
    pub fn is_backfill(&self) -> bool {
        matches!(self.origin, RequestOrigin::Backfill { .. })
    }
}

/// Content identity of a detail record: every field except the source URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey(String);

impl ContentKey {
    /// Get the key as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One pricing tier read from a detail page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    /// Lookup key of the owning listing
    pub listing_key: LookupKey,

    /// URL of the page the record was read from
    pub source_url: String,

    /// Free-text duration ("3 months", "1 week"), if the page shows one
    pub duration: Option<String>,

    /// Undiscounted price
    pub base_price: Option<f64>,

    /// Price actually offered
    pub offered_price: Option<f64>,

    /// Discount relative to the base price
    pub savings: Option<f64>,

    /// Everything else the page exposes (mileage, insurance, deposit, ...)
    #[serde(default)]
    pub ancillary: IndexMap<String, Value>,
}

impl DetailRecord {
    /// Create a record with only identity fields set.
    pub fn new(listing_key: LookupKey, source_url: impl Into<String>) -> Self {
        Self {
            listing_key,
            source_url: source_url.into(),
            duration: None,
            base_price: None,
            offered_price: None,
            savings: None,
            ancillary: IndexMap::new(),
        }
    }

    /// Set the duration text.
    pub fn with_duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    /// Set base, offered and savings in one go.
    pub fn with_prices(mut self, base: f64, offered: f64, savings: f64) -> Self {
        self.base_price = Some(base);
        self.offered_price = Some(offered);
        self.savings = Some(savings);
        self
    }

    /// Add an ancillary attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ancillary.insert(key.into(), value.into());
        self
    }

    /// Validate a raw extractor record against the detail contract.
    ///
    /// Prices may be numbers or text such as `"AED 1,250"`; a price that
    /// carries no digits is treated as absent.
    pub fn from_raw(
        listing_key: &LookupKey,
        fallback_url: &str,
        raw: &RawRecord,
    ) -> SchemaResult<Self> {
        let source_url = raw
            .text(SOURCE_URL)
            .unwrap_or_else(|| fallback_url.to_string());
        if source_url.is_empty() {
            return Err(SchemaError::MissingField { field: SOURCE_URL });
        }

        let mut ancillary = IndexMap::new();
        for (key, value) in &raw.attributes {
            match key.as_str() {
                SOURCE_URL | PAGE_STATUS | "duration" | "base_price" | "offered_price"
                | "savings" => {}
                _ => {
                    ancillary.insert(key.clone(), value.clone());
                }
            }
        }

        Ok(Self {
            listing_key: listing_key.clone(),
            source_url,
            duration: raw.text("duration"),
            base_price: raw.get("base_price").and_then(price_value),
            offered_price: raw.get("offered_price").and_then(price_value),
            savings: raw.get("savings").and_then(price_value),
            ancillary,
        })
    }

    /// Compute the content key.
    ///
    /// The encoding is canonical: ancillary attributes are hashed in
    /// sorted key order so insertion order never matters.
    pub fn content_key(&self) -> ContentKey {
        let mut ancillary: Vec<(&String, &Value)> = self.ancillary.iter().collect();
        ancillary.sort_by(|a, b| a.0.cmp(b.0));

        let canonical = json!({
            "listing_key": self.listing_key.as_str(),
            "duration": self.duration,
            "base_price": self.base_price,
            "offered_price": self.offered_price,
            "savings": self.savings,
            "ancillary": ancillary,
        });

        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        ContentKey(format!("{:x}", hasher.finalize()))
    }
}

/// Read a price from a number or from text containing digits.
fn price_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            cleaned.trim_matches('.').parse().ok()
        }
        _ => None,
    }
}

/// How a detail request finished.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailStatus {
    /// Page loaded and yielded at least one record
    Fetched,
    /// Page loaded but yielded nothing
    Empty,
    /// The site reported the page as missing
    NotFound,
    /// The page did not load within the timeout
    TimedOut,
    /// Navigation failed
    Failed(String),
}

impl DetailStatus {
    /// A broken listing is excluded from backfill.
    pub fn is_broken(&self) -> bool {
        !matches!(self, Self::Fetched)
    }
}

/// A resolved detail request with whatever it produced.
#[derive(Debug, Clone)]
pub struct DetailOutcome {
    pub request: DetailRequest,
    pub status: DetailStatus,
    pub records: Vec<DetailRecord>,
}
