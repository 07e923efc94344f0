//! Operator diagnostics log.
//!
//! Concurrent tasks never touch the log directly. Each holds a cloneable
//! [`DiagnosticsHandle`] and sends events over a channel; one consumer task
//! owns the ordered log, numbers entries per context, and hands the log back
//! once every handle is dropped. Each event is also mirrored to `tracing`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::PipelineError;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ListingsLoaded,
    ListingTimeout,
    ListingPageFailed,
    ListingPageNotFound,
    InvalidListing,
    SchemaMismatch,
    NoCatalogMatch,
    DuplicateSkipped,
    DetailFetched,
    DetailEmpty,
    DetailTimeout,
    DetailNotFound,
    DetailFailed,
    DurationParseFailure,
    BackfillIssued,
    BackfillDuplicate,
    BucketMissing,
    OutsidePartition,
    NoContractData,
    RunCompleted,
}

/// How loudly an event should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl EventKind {
    /// Default severity of this kind of event.
    pub fn severity(&self) -> Severity {
        match self {
            Self::ListingsLoaded
            | Self::DuplicateSkipped
            | Self::DetailFetched
            | Self::BackfillIssued
            | Self::BackfillDuplicate
            | Self::RunCompleted => Severity::Info,
            Self::ListingPageFailed | Self::SchemaMismatch | Self::DetailFailed => Severity::Error,
            _ => Severity::Warn,
        }
    }
}

/// An event as sent by a task.
#[derive(Debug, Clone)]
struct DiagnosticEvent {
    context: Arc<str>,
    kind: EventKind,
    message: String,
    at: DateTime<Utc>,
}

/// One line of the finished log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Position of this entry within its context, starting at 1
    pub seq: usize,
    pub context: String,
    pub kind: EventKind,
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}.{}] {}",
            self.at.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.context,
            self.seq,
            self.message
        )
    }
}

/// Sending side of the diagnostics log.
#[derive(Debug, Clone)]
pub struct DiagnosticsHandle {
    tx: mpsc::UnboundedSender<DiagnosticEvent>,
    context: Arc<str>,
}

impl DiagnosticsHandle {
    /// A handle that reports under another context label.
    pub fn with_context(&self, context: impl AsRef<str>) -> Self {
        Self {
            tx: self.tx.clone(),
            context: Arc::from(context.as_ref()),
        }
    }

    /// Current context label.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Record an event.
    pub fn emit(&self, kind: EventKind, message: impl Into<String>) {
        let message = message.into();
        match kind.severity() {
            Severity::Info => tracing::info!(context = %self.context, kind = ?kind, "{}", message),
            Severity::Warn => tracing::warn!(context = %self.context, kind = ?kind, "{}", message),
            Severity::Error => tracing::error!(context = %self.context, kind = ?kind, "{}", message),
        }

        let event = DiagnosticEvent {
            context: Arc::clone(&self.context),
            kind,
            message,
            at: Utc::now(),
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(context = %self.context, "Diagnostics consumer gone; event dropped");
        }
    }
}

/// Receiving side: the single consumer that owns the log.
pub struct DiagnosticsLog {
    consumer: JoinHandle<Vec<LogEntry>>,
}

impl DiagnosticsLog {
    /// Wait for every handle to drop and return the ordered log.
    pub async fn finish(self) -> Result<Vec<LogEntry>, PipelineError> {
        self.consumer
            .await
            .map_err(|e| PipelineError::Diagnostics(e.to_string()))
    }
}

/// Start a diagnostics log with a root context label.
///
/// Must be called from within a tokio runtime.
pub fn channel(context: impl AsRef<str>) -> (DiagnosticsHandle, DiagnosticsLog) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DiagnosticEvent>();

    let consumer = tokio::spawn(async move {
        let mut entries = Vec::new();
        let mut counters: HashMap<Arc<str>, usize> = HashMap::new();

        while let Some(event) = rx.recv().await {
            let seq = counters.entry(Arc::clone(&event.context)).or_insert(0);
            *seq += 1;
            entries.push(LogEntry {
                seq: *seq,
                context: event.context.to_string(),
                kind: event.kind,
                severity: event.kind.severity(),
                message: event.message,
                at: event.at,
            });
        }

        entries
    });

    let handle = DiagnosticsHandle {
        tx,
        context: Arc::from(context.as_ref()),
    };
    (handle, DiagnosticsLog { consumer })
}

/// Count entries of one kind.
pub fn count(entries: &[LogEntry], kind: EventKind) -> usize {
    entries.iter().filter(|e| e.kind == kind).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_numbered_per_context() {
        let (root, log) = channel("YANGO");
        let camry = root.with_context("TOYOTA-CAMRY");

        root.emit(EventKind::ListingsLoaded, "loaded");
        camry.emit(EventKind::DetailFetched, "one");
        camry.emit(EventKind::DetailTimeout, "two");
        root.emit(EventKind::RunCompleted, "done");
        drop(root);
        drop(camry);

        let entries = log.finish().await.unwrap();
        assert_eq!(entries.len(), 4);
        let seqs: Vec<(String, usize)> = entries.iter().map(|e| (e.context.clone(), e.seq)).collect();
        assert_eq!(
            seqs,
            vec![
                ("YANGO".to_string(), 1),
                ("TOYOTA-CAMRY".to_string(), 1),
                ("TOYOTA-CAMRY".to_string(), 2),
                ("YANGO".to_string(), 2),
            ]
        );
        assert_eq!(entries[2].severity, Severity::Warn);
        assert!(entries[2].to_string().contains("[TOYOTA-CAMRY.2] two"));
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_interleave() {
        let (root, log) = channel("RUN");

        let mut tasks = Vec::new();
        for task in 0..8 {
            let handle = root.with_context(format!("T{task}"));
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    handle.emit(EventKind::DetailFetched, format!("task {task} event {i}"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        drop(root);
        for t in tasks {
            t.await.unwrap();
        }

        let entries = log.finish().await.unwrap();
        assert_eq!(entries.len(), 200);
        for task in 0..8 {
            let ctx = format!("T{task}");
            let seqs: Vec<usize> = entries.iter().filter(|e| e.context == ctx).map(|e| e.seq).collect();
            assert_eq!(seqs, (1..=25).collect::<Vec<_>>());
        }
        assert_eq!(count(&entries, EventKind::DetailFetched), 200);
    }
}
