//! Result assembly - left join, bucket collapse, ordering, projection.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::pipeline::diagnostics::{DiagnosticsHandle, EventKind};
use crate::pipeline::normalize::with_duration;
use crate::sources::profile::SourceProfile;
use crate::types::detail::DetailRecord;
use crate::types::duration::{leading_number, BucketPlacement, DurationPartition};
use crate::types::listing::{ContractType, Listing, LookupKey};
use crate::types::output::{OutputRow, OutputTable};

/// Position of a row in the final ordering.
///
/// Compared field by field: contract type, listing key, bucket index
/// (rows outside the partition last), numeric duration, duration text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    contract_type: ContractType,
    listing_key: LookupKey,
    bucket: usize,
    number: u32,
    duration: String,
}

impl SortKey {
    /// Sort key of a row under a profile's partitions.
    pub fn of(profile: &SourceProfile, row: &OutputRow) -> Self {
        let duration = row.duration.clone().unwrap_or_default();
        let bucket = match (profile.partition(row.contract_type), row.duration.as_deref()) {
            (Some(partition), Some(text)) => partition.place(text).index().unwrap_or(usize::MAX),
            _ => 0,
        };

        Self {
            contract_type: row.contract_type,
            listing_key: row.listing_key.clone(),
            bucket,
            number: leading_number(&duration).unwrap_or(u32::MAX),
            duration,
        }
    }

    /// Whether the row's duration fits no bucket of its partition.
    pub fn is_outside_partition(&self) -> bool {
        self.bucket == usize::MAX
    }
}

/// Compare two rows the way the assembler orders them.
pub fn compare_rows(profile: &SourceProfile, a: &OutputRow, b: &OutputRow) -> Ordering {
    SortKey::of(profile, a).cmp(&SortKey::of(profile, b))
}

/// Joins listings with their detail records into the output table.
pub struct ResultAssembler<'a> {
    profile: &'a SourceProfile,
    diagnostics: DiagnosticsHandle,
}

impl<'a> ResultAssembler<'a> {
    /// Create an assembler for one source.
    pub fn new(profile: &'a SourceProfile, diagnostics: DiagnosticsHandle) -> Self {
        Self {
            profile,
            diagnostics,
        }
    }

    /// Build the sorted, schema-projected table.
    ///
    /// Every listing yields at least one row; a listing without detail
    /// records gets one row with empty contract fields. The profile's row
    /// rules run on every joined row.
    pub fn assemble(&self, listings: &[Listing], records: Vec<DetailRecord>) -> OutputTable {
        let mut grouped: HashMap<LookupKey, Vec<DetailRecord>> = HashMap::new();
        for record in records {
            grouped.entry(record.listing_key.clone()).or_default().push(record);
        }

        let mut rows = Vec::new();
        for listing in listings {
            let mut details = grouped.remove(&listing.key).unwrap_or_default();
            if let Some(partition) = self.collapse_partition(listing) {
                details = self.collapse(partition, details);
            }

            if details.is_empty() {
                self.diagnostics.emit(
                    EventKind::NoContractData,
                    format!("No contract data for {} ({})", listing.key, listing.title()),
                );
                rows.push(self.derive(OutputRow::join(listing, None)));
            } else {
                rows.extend(details.iter().map(|d| self.derive(OutputRow::join(listing, Some(d)))));
            }
        }

        let mut keyed: Vec<(SortKey, OutputRow)> =
            rows.into_iter().map(|r| (self.sort_key(&r), r)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        OutputTable {
            schema: self.profile.schema.clone(),
            rows: keyed.into_iter().map(|(_, r)| r).collect(),
        }
    }

    fn derive(&self, mut row: OutputRow) -> OutputRow {
        for rule in &self.profile.row_rules {
            rule.apply(&mut row);
        }
        row
    }

    fn collapse_partition(&self, listing: &Listing) -> Option<&'a DurationPartition> {
        if self.profile.collapse_buckets && self.profile.requires_coverage(listing.contract_type) {
            self.profile.partition(listing.contract_type)
        } else {
            None
        }
    }

    /// Keep the shortest duration per bucket and relabel it with the
    /// bucket's display text. Records that fit no bucket pass through.
    fn collapse(&self, partition: &DurationPartition, records: Vec<DetailRecord>) -> Vec<DetailRecord> {
        let mut best: Vec<Option<(u32, DetailRecord)>> = vec![None; partition.len()];
        let mut unplaced = Vec::new();

        for record in records {
            let placement = record.duration.as_deref().map(|d| (partition.place(d), leading_number(d)));
            match placement {
                Some((BucketPlacement::Bucket(i), Some(n))) => {
                    let slot = &mut best[i];
                    if slot.as_ref().map_or(true, |(kept, _)| n < *kept) {
                        *slot = Some((n, record));
                    }
                }
                _ => unplaced.push(record),
            }
        }

        let mut collapsed = Vec::new();
        for (index, slot) in best.into_iter().enumerate() {
            let (Some((n, mut record)), Some(bucket)) = (slot, partition.get(index)) else {
                continue;
            };
            record.duration = Some(bucket.display.clone());
            if let Some(param) = self.profile.duration_param.as_deref() {
                if let Ok(url) = with_duration(&record.source_url, param, n) {
                    record.source_url = url;
                }
            }
            collapsed.push(record);
        }
        collapsed.extend(unplaced);
        collapsed
    }

    fn sort_key(&self, row: &OutputRow) -> SortKey {
        let key = SortKey::of(self.profile, row);
        if key.is_outside_partition() {
            self.diagnostics.emit(
                EventKind::OutsidePartition,
                format!(
                    "Duration {:?} for {} is outside the {} partition; placed last",
                    key.duration, row.listing_key, row.contract_type
                ),
            );
        }
        key
    }
}
