//! Record extractor implementations.
//!
//! Site-specific markup extractors are supplied by the caller through
//! [`RecordExtractor`]; this crate ships the JSON extractor only.

mod json;

pub use json::JsonRecordExtractor;

pub use crate::traits::extractor::{ExtractContext, PageKind, RawRecord, RecordExtractor};
