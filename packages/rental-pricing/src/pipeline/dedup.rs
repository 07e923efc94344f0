//! Content deduplication of detail records.

use std::collections::HashSet;

use crate::types::detail::{ContentKey, DetailRecord};

/// Drops detail records whose content repeats.
///
/// The content key covers every field except the raw source URL and
/// includes the listing key, so two listings never shadow each other.
/// The first occurrence wins and input order is preserved.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<ContentKey>,
    dropped: usize,
}

impl Deduplicator {
    /// Create a deduplicator with nothing seen.
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep records whose content key has not been seen yet.
    pub fn dedup(&mut self, records: impl IntoIterator<Item = DetailRecord>) -> Vec<DetailRecord> {
        records
            .into_iter()
            .filter(|r| {
                let fresh = self.seen.insert(r.content_key());
                if !fresh {
                    self.dropped += 1;
                }
                fresh
            })
            .collect()
    }

    /// Number of records dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Deduplicate one batch of records.
pub fn dedup_records(records: impl IntoIterator<Item = DetailRecord>) -> Vec<DetailRecord> {
    Deduplicator::new().dedup(records)
}
