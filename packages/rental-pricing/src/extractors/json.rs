//! JSON record extractor.
//!
//! Reads records straight out of JSON documents: a top-level array of
//! objects, an object with a `records` array, or a single object. Useful
//! for sites that embed their listing state as JSON, and as the extractor
//! behind the mock fetcher in tests.

use serde_json::Value;
use tracing::debug;

use crate::traits::extractor::{ExtractContext, RawRecord, RecordExtractor};
use crate::traits::fetcher::DocumentSnapshot;

/// Extractor for JSON document bodies.
#[derive(Debug, Clone, Default)]
pub struct JsonRecordExtractor {
    pointer: Option<String>,
}

impl JsonRecordExtractor {
    /// Create an extractor reading the whole body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read records from a JSON pointer (e.g. `/props/pageProps/cars`).
    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }

    fn records(value: &Value) -> Vec<RawRecord> {
        match value {
            Value::Array(items) => items.iter().filter_map(Self::record).collect(),
            Value::Object(map) => match map.get("records") {
                Some(Value::Array(items)) => items.iter().filter_map(Self::record).collect(),
                _ => Self::record(value).into_iter().collect(),
            },
            _ => Vec::new(),
        }
    }

    fn record(value: &Value) -> Option<RawRecord> {
        let map = value.as_object()?;
        Some(RawRecord {
            attributes: map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        })
    }
}

impl RecordExtractor for JsonRecordExtractor {
    fn extract(&self, snapshot: &DocumentSnapshot, context: &ExtractContext) -> Vec<RawRecord> {
        if !snapshot.has_content() {
            return Vec::new();
        }

        let document: Value = match serde_json::from_str(&snapshot.body) {
            Ok(v) => v,
            Err(e) => {
                debug!(url = %snapshot.url, source = %context.source, error = %e, "Body is not JSON");
                return Vec::new();
            }
        };

        let root = match &self.pointer {
            Some(pointer) => match document.pointer(pointer) {
                Some(v) => v,
                None => return Vec::new(),
            },
            None => &document,
        };

        Self::records(root)
    }

    fn name(&self) -> &str {
        "json"
    }
}
