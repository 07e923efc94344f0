//! Listing types - contract cadence, lookup keys, canonical listings.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::SchemaError;

/// Rental billing cadence.
///
/// The declaration order is the output sort order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ContractType {
    Daily,
    Weekly,
    Monthly,
}

impl ContractType {
    /// All contract types in sort order.
    pub const ALL: [ContractType; 3] = [Self::Daily, Self::Weekly, Self::Monthly];

    /// Lowercase name as used in URLs and output tables.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(SchemaError::UnknownContractType {
                value: other.to_string(),
            }),
        }
    }
}

/// Canonical identity of a listing's source URL.
///
/// Two URLs that differ only in non-identifying query parameters
/// (duration selectors, locale hints) share a lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LookupKey(String);

impl LookupKey {
    /// Wrap an already-canonical key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LookupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A canonicalized listing that passed identity validation.
///
/// `make` and `model` are uppercase, `year` is an integer; a listing
/// never exists with missing identity fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    /// Canonical lookup key
    pub key: LookupKey,

    /// URL as it appeared on the list page
    pub source_url: String,

    /// Uppercase make
    pub make: String,

    /// Uppercase model (site alias)
    pub model: String,

    /// Model year
    pub year: i32,

    /// Contract cadence the listing was found under
    pub contract_type: ContractType,

    /// Extracted from a list page that timed out before fully loading
    #[serde(default)]
    pub partial: bool,

    /// Remaining extractor attributes (title, ratings, mileage, ...)
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,
}

impl Listing {
    /// Display title: the extracted `title` attribute, else
    /// `"{make} {model} {year}"` in lowercase.
    pub fn title(&self) -> String {
        match self.attributes.get("title").and_then(Value::as_str) {
            Some(title) if !title.trim().is_empty() => title.trim().to_string(),
            _ => format!(
                "{} {} {}",
                self.make.to_lowercase(),
                self.model.to_lowercase(),
                self.year
            ),
        }
    }

    /// Mark this listing as coming from a partial page.
    pub fn into_partial(mut self) -> Self {
        self.partial = true;
        self
    }
}
