//! Typed errors for the rental pricing pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling. Only [`ConfigLoadError`]
//! is fatal to a run; everything else is recorded per request and
//! surfaced through the diagnostics log.

use thiserror::Error;

use crate::traits::fetcher::DocumentSnapshot;

/// Errors that abort a pipeline run or a trigger request.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The catalog could not be loaded
    #[error("config load failed: {0}")]
    ConfigLoad(#[from] ConfigLoadError),

    /// A source name was requested that the registry does not know
    #[error("unknown source: {name}")]
    UnknownSource { name: String },

    /// The trigger selection contained no runnable source
    #[error("no valid source selected")]
    NoSourceSelected,

    /// The diagnostics consumer stopped before the run finished
    #[error("diagnostics log closed unexpectedly: {0}")]
    Diagnostics(String),
}

/// Errors loading the make/model/year catalog.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// The catalog file could not be read
    #[error("catalog unreadable: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog is not valid CSV
    #[error("catalog malformed: {0}")]
    Csv(#[from] csv::Error),

    /// A required column is absent from the header row
    #[error("catalog missing column: {column}")]
    MissingColumn { column: String },
}

/// Errors returned by a [`PageFetcher`](crate::traits::fetcher::PageFetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The page did not become ready within the timeout.
    ///
    /// Renderers that can capture the document at the deadline return it as
    /// `partial` so callers may keep whatever was already on the page.
    #[error("timeout fetching: {url}")]
    Timeout {
        url: String,
        partial: Option<Box<DocumentSnapshot>>,
    },

    /// Navigation failed (connection, HTTP status, renderer crash)
    #[error("navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    /// The URL could not be parsed
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },
}

impl FetchError {
    /// Create a navigation error from any displayable cause.
    pub fn navigation(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a timeout error without a partial document.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout {
            url: url.into(),
            partial: None,
        }
    }
}

/// A raw record does not satisfy the contract of its record type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A required attribute is absent or empty
    #[error("missing field: {field}")]
    MissingField { field: &'static str },

    /// The year attribute is not an integer
    #[error("invalid year: {value}")]
    InvalidYear { value: String },

    /// The source URL could not be canonicalized
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] UrlError),

    /// Contract type is not daily/weekly/monthly
    #[error("unknown contract type: {value}")]
    UnknownContractType { value: String },

    /// None of the records on a page carry the join columns
    #[error("join columns absent from record shape: {missing:?}")]
    MissingJoinColumns { missing: Vec<&'static str> },
}

/// Failures of the pure URL canonicalization and rewrite functions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    /// The URL could not be parsed
    #[error("cannot parse {url}: {reason}")]
    Parse { url: String, reason: String },

    /// The URL has no host component
    #[error("URL has no host: {url}")]
    NoHost { url: String },
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for record validation.
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;
