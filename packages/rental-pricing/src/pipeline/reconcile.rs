//! Duration coverage reconciliation and the single backfill pass.
//!
//! A monthly listing is expected to have a detail record in every bucket
//! of its duration partition. After the primary fetch, each missing bucket
//! gets exactly one alternate request: the listing URL with its duration
//! selector set to the bucket's smallest value. Whatever is still missing
//! after that pass is reported, never retried.

use std::collections::{BTreeSet, HashMap};

use crate::pipeline::diagnostics::{DiagnosticsHandle, EventKind};
use crate::pipeline::fetch::IssuedKeys;
use crate::pipeline::normalize::with_duration;
use crate::sources::profile::SourceProfile;
use crate::types::detail::{DetailOutcome, DetailRecord, DetailRequest, RequestKey, RequestOrigin};
use crate::types::duration::{BucketPlacement, DurationPartition};
use crate::types::listing::{Listing, LookupKey};

/// Bucket coverage of a set of detail records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Coverage {
    /// Indices of buckets with at least one record
    pub covered: BTreeSet<usize>,

    /// Durations that could not be placed (None when the record had none)
    pub unparsed: Vec<Option<String>>,
}

impl Coverage {
    /// Bucket indices with no record, in partition order.
    pub fn missing(&self, partition: &DurationPartition) -> Vec<usize> {
        (0..partition.len())
            .filter(|i| !self.covered.contains(i))
            .collect()
    }
}

/// Compute which buckets the records cover.
///
/// Durations outside the partition cover nothing; unparsable ones are
/// listed separately.
pub fn bucket_coverage<'r>(
    partition: &DurationPartition,
    records: impl IntoIterator<Item = &'r DetailRecord>,
) -> Coverage {
    let mut coverage = Coverage::default();
    for record in records {
        match record.duration.as_deref().map(|d| partition.place(d)) {
            Some(BucketPlacement::Bucket(i)) => {
                coverage.covered.insert(i);
            }
            Some(BucketPlacement::Outside(_)) => {}
            Some(BucketPlacement::Unparsed) | None => coverage.unparsed.push(record.duration.clone()),
        }
    }
    coverage
}

/// Buckets a listing still lacks after the backfill pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingBuckets {
    pub listing_key: LookupKey,

    /// Bucket labels, in partition order
    pub buckets: Vec<String>,

    /// The primary request failed, so no backfill was attempted
    pub broken: bool,
}

/// Detects coverage gaps and plans the backfill pass.
pub struct DurationCoverageReconciler<'a> {
    profile: &'a SourceProfile,
    issued: &'a IssuedKeys,
    diagnostics: DiagnosticsHandle,
}

impl<'a> DurationCoverageReconciler<'a> {
    /// Create a reconciler for one source run.
    pub fn new(profile: &'a SourceProfile, issued: &'a IssuedKeys, diagnostics: DiagnosticsHandle) -> Self {
        Self {
            profile,
            issued,
            diagnostics,
        }
    }

    fn partition_for(&self, listing: &Listing) -> Option<&'a DurationPartition> {
        if self.profile.requires_coverage(listing.contract_type) {
            self.profile.partition(listing.contract_type)
        } else {
            None
        }
    }

    fn report_unparsed(&self, listing: &Listing, coverage: &Coverage) {
        for duration in &coverage.unparsed {
            self.diagnostics.emit(
                EventKind::DurationParseFailure,
                format!(
                    "Unparsable duration {:?} for {}; excluded from coverage",
                    duration.as_deref().unwrap_or(""),
                    listing.key
                ),
            );
        }
    }

    /// Plan alternate requests for the buckets the primary pass missed.
    ///
    /// Broken listings and listings that do not need coverage are skipped.
    /// Each alternate is claimed in the run's issued set first; a request
    /// key that was already issued is logged and not repeated.
    pub fn plan(&self, listings: &[Listing], primary: &[DetailOutcome]) -> Vec<DetailRequest> {
        let by_key: HashMap<&LookupKey, &DetailOutcome> = primary
            .iter()
            .filter(|o| !o.request.is_backfill())
            .map(|o| (&o.request.listing_key, o))
            .collect();

        let mut requests = Vec::new();
        for listing in listings {
            let Some(partition) = self.partition_for(listing) else {
                continue;
            };
            let Some(outcome) = by_key.get(&listing.key) else {
                continue;
            };
            if outcome.status.is_broken() {
                continue;
            }

            let coverage = bucket_coverage(partition, &outcome.records);
            self.report_unparsed(listing, &coverage);

            let Some(param) = self.profile.duration_param.as_deref() else {
                continue;
            };

            for index in coverage.missing(partition) {
                let Some(bucket) = partition.get(index) else {
                    continue;
                };
                let duration = bucket.representative();

                let url = match with_duration(&outcome.request.source_url, param, duration) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!(listing = %listing.key, error = %e, "Cannot build backfill URL");
                        continue;
                    }
                };

                let key = RequestKey {
                    lookup: listing.key.clone(),
                    duration: Some(duration),
                };
                if !self.issued.claim_request(&key) {
                    self.diagnostics.emit(
                        EventKind::BackfillDuplicate,
                        format!("Backfill for bucket {} already issued: {key}", bucket.label),
                    );
                    continue;
                }

                self.diagnostics.emit(
                    EventKind::BackfillIssued,
                    format!("Backfill bucket {} for {}: {url}", bucket.label, listing.key),
                );
                requests.push(DetailRequest {
                    listing_key: listing.key.clone(),
                    source_url: url,
                    contract_type: listing.contract_type,
                    duration_hint: Some(duration),
                    origin: RequestOrigin::Backfill {
                        bucket: bucket.label.clone(),
                    },
                });
            }
        }

        requests
    }

    /// Report buckets still unmet after the backfill pass.
    ///
    /// `outcomes` holds both primary and backfill outcomes. Broken
    /// listings report every bucket.
    pub fn finalize(&self, listings: &[Listing], outcomes: &[DetailOutcome]) -> Vec<MissingBuckets> {
        let mut by_key: HashMap<&LookupKey, Vec<&DetailOutcome>> = HashMap::new();
        for outcome in outcomes {
            by_key.entry(&outcome.request.listing_key).or_default().push(outcome);
        }

        let mut missing = Vec::new();
        for listing in listings {
            let Some(partition) = self.partition_for(listing) else {
                continue;
            };
            let listing_outcomes = by_key.get(&listing.key).map(Vec::as_slice).unwrap_or_default();

            let broken = listing_outcomes
                .iter()
                .find(|o| !o.request.is_backfill())
                .map_or(true, |o| o.status.is_broken());

            let coverage = if broken {
                Coverage::default()
            } else {
                let backfilled = bucket_coverage(
                    partition,
                    listing_outcomes
                        .iter()
                        .filter(|o| o.request.is_backfill())
                        .flat_map(|o| &o.records),
                );
                self.report_unparsed(listing, &backfilled);
                bucket_coverage(partition, listing_outcomes.iter().flat_map(|o| &o.records))
            };

            let buckets: Vec<String> = coverage
                .missing(partition)
                .into_iter()
                .filter_map(|i| partition.get(i).map(|b| b.label.clone()))
                .collect();
            if buckets.is_empty() {
                continue;
            }

            self.diagnostics.emit(
                EventKind::BucketMissing,
                format!(
                    "Missing duration buckets [{}] for {}{}",
                    buckets.join(", "),
                    listing.key,
                    if broken { " (broken listing)" } else { "" }
                ),
            );
            missing.push(MissingBuckets {
                listing_key: listing.key.clone(),
                buckets,
                broken,
            });
        }

        missing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::diagnostics::{self, count};
    use crate::types::detail::DetailStatus;
    use crate::types::listing::ContractType;
    use indexmap::IndexMap;
    use proptest::prelude::*;

    const URL: &str = "https://drive.example.com/car/1?since=1&duration_months=9&is_monthly=true";

    fn profile() -> SourceProfile {
        SourceProfile::new("demo")
            .with_duration_param("duration_months")
            .with_partition(ContractType::Monthly, DurationPartition::monthly())
            .with_coverage_check()
    }

    fn listing() -> Listing {
        Listing {
            key: LookupKey::new("https://drive.example.com/car/1?is_monthly=true&since=1"),
            source_url: URL.into(),
            make: "TOYOTA".into(),
            model: "CAMRY".into(),
            year: 2023,
            contract_type: ContractType::Monthly,
            partial: false,
            attributes: IndexMap::new(),
        }
    }

    fn request(origin: RequestOrigin, url: &str, hint: Option<u32>) -> DetailRequest {
        DetailRequest {
            listing_key: listing().key,
            source_url: url.into(),
            contract_type: ContractType::Monthly,
            duration_hint: hint,
            origin,
        }
    }

    fn outcome(request: DetailRequest, status: DetailStatus, durations: &[&str]) -> DetailOutcome {
        let records = durations
            .iter()
            .map(|d| DetailRecord::new(request.listing_key.clone(), &request.source_url).with_duration(*d))
            .collect();
        DetailOutcome {
            request,
            status,
            records,
        }
    }

    fn primary(durations: &[&str]) -> DetailOutcome {
        outcome(request(RequestOrigin::Primary, URL, Some(9)), DetailStatus::Fetched, durations)
    }

    #[tokio::test]
    async fn test_plan_one_request_per_missing_bucket() {
        let profile = profile();
        let issued = IssuedKeys::new();
        let (diag, log) = diagnostics::channel("TEST");
        let reconciler = DurationCoverageReconciler::new(&profile, &issued, diag);

        let requests = reconciler.plan(&[listing()], &[primary(&["1 month", "5 months"])]);

        let hints: Vec<Option<u32>> = requests.iter().map(|r| r.duration_hint).collect();
        assert_eq!(hints, vec![Some(2), Some(7), Some(10)]);
        assert_eq!(
            requests[0].source_url,
            "https://drive.example.com/car/1?since=1&duration_months=2&is_monthly=true"
        );
        assert!(requests.iter().all(DetailRequest::is_backfill));
        assert_eq!(
            requests[2].origin,
            RequestOrigin::Backfill { bucket: "10+".into() }
        );

        drop(reconciler);
        let entries = log.finish().await.unwrap();
        assert_eq!(count(&entries, EventKind::BackfillIssued), 3);
    }

    #[tokio::test]
    async fn test_plan_never_reissues_a_request_key() {
        let profile = profile();
        let issued = IssuedKeys::new();
        let (diag, log) = diagnostics::channel("TEST");
        let reconciler = DurationCoverageReconciler::new(&profile, &issued, diag);

        let first = reconciler.plan(&[listing()], &[primary(&["1 month"])]);
        assert_eq!(first.len(), 4);
        let second = reconciler.plan(&[listing()], &[primary(&["1 month"])]);
        assert!(second.is_empty());

        drop(reconciler);
        let entries = log.finish().await.unwrap();
        assert_eq!(count(&entries, EventKind::BackfillDuplicate), 4);
    }

    #[tokio::test]
    async fn test_broken_listing_is_not_backfilled() {
        let profile = profile();
        let issued = IssuedKeys::new();
        let (diag, log) = diagnostics::channel("TEST");
        let reconciler = DurationCoverageReconciler::new(&profile, &issued, diag);

        let failed = outcome(request(RequestOrigin::Primary, URL, Some(9)), DetailStatus::NotFound, &[]);
        assert!(reconciler.plan(&[listing()], &[failed.clone()]).is_empty());

        let missing = reconciler.finalize(&[listing()], &[failed]);
        assert_eq!(missing.len(), 1);
        assert!(missing[0].broken);
        assert_eq!(missing[0].buckets, vec!["1", "2-3", "4-6", "7-9", "10+"]);

        drop(reconciler);
        let entries = log.finish().await.unwrap();
        assert_eq!(count(&entries, EventKind::BucketMissing), 1);
        assert_eq!(count(&entries, EventKind::BackfillIssued), 0);
    }

    #[tokio::test]
    async fn test_finalize_reports_unmet_buckets_and_parse_failures() {
        let profile = profile();
        let issued = IssuedKeys::new();
        let (diag, log) = diagnostics::channel("TEST");
        let reconciler = DurationCoverageReconciler::new(&profile, &issued, diag);

        let first = primary(&["1 month", "flexible"]);
        let planned = reconciler.plan(&[listing()], &[first.clone()]);
        assert_eq!(planned.len(), 4);

        let mut outcomes = vec![first];
        for (req, duration) in planned.into_iter().zip(["3 months", "6 months", "", "12 months"]) {
            let durations: Vec<&str> = if duration.is_empty() { vec![] } else { vec![duration] };
            let status = if durations.is_empty() { DetailStatus::Empty } else { DetailStatus::Fetched };
            outcomes.push(outcome(req, status, &durations));
        }

        let missing = reconciler.finalize(&[listing()], &outcomes);
        assert_eq!(
            missing,
            vec![MissingBuckets {
                listing_key: listing().key,
                buckets: vec!["7-9".into()],
                broken: false,
            }]
        );

        drop(reconciler);
        let entries = log.finish().await.unwrap();
        assert_eq!(count(&entries, EventKind::DurationParseFailure), 1);
    }

    #[tokio::test]
    async fn test_non_monthly_listings_are_ignored() {
        let profile = profile();
        let issued = IssuedKeys::new();
        let (diag, log) = diagnostics::channel("TEST");
        let reconciler = DurationCoverageReconciler::new(&profile, &issued, diag);

        let mut weekly = listing();
        weekly.contract_type = ContractType::Weekly;
        assert!(reconciler.plan(&[weekly.clone()], &[primary(&[])]).is_empty());
        assert!(reconciler.finalize(&[weekly], &[primary(&[])]).is_empty());

        drop(reconciler);
        log.finish().await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_backfill_matches_gaps_and_never_regresses(
            initial in proptest::collection::btree_set(0usize..5, 0..5),
            answered in proptest::collection::vec(any::<bool>(), 5),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let profile = profile();
                let partition = DurationPartition::monthly();
                let issued = IssuedKeys::new();
                let (diag, log) = diagnostics::channel("PROP");
                let reconciler = DurationCoverageReconciler::new(&profile, &issued, diag);

                let durations: Vec<String> = initial
                    .iter()
                    .map(|i| format!("{} months", partition.buckets()[*i].representative()))
                    .collect();
                let refs: Vec<&str> = durations.iter().map(String::as_str).collect();
                let first = primary(&refs);
                let before = bucket_coverage(&partition, &first.records);

                let planned = reconciler.plan(&[listing()], &[first.clone()]);
                let gaps = before.missing(&partition);
                prop_assert_eq!(planned.len(), gaps.len());

                let mut outcomes = vec![first];
                for (req, ok) in planned.into_iter().zip(answered.iter()) {
                    let text = req.duration_hint.map(|d| format!("{d} months")).unwrap_or_default();
                    if *ok {
                        outcomes.push(outcome(req, DetailStatus::Fetched, &[text.as_str()]));
                    } else {
                        outcomes.push(outcome(req, DetailStatus::TimedOut, &[]));
                    }
                }

                let after = bucket_coverage(&partition, outcomes.iter().flat_map(|o| &o.records));
                prop_assert!(after.covered.is_superset(&before.covered));

                let missing = reconciler.finalize(&[listing()], &outcomes);
                let unmet = missing.first().map(|m| m.buckets.len()).unwrap_or(0);
                prop_assert_eq!(unmet, partition.len() - after.covered.len());

                drop(reconciler);
                log.finish().await.unwrap();
                Ok(())
            })?;
        }
    }
}
