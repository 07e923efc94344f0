//! Duration buckets: a fixed partition of contract lengths.
//!
//! Detail pages describe durations as free text ("3 months", "10 Months",
//! "1 week"). Coverage and sorting only look at the leading number of that
//! text and the bucket it falls in.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// First run of digits in a duration string.
///
/// Returns `None` when the text carries no number at all.
pub fn leading_number(text: &str) -> Option<u32> {
    static DIGITS: OnceLock<Option<Regex>> = OnceLock::new();
    let re = DIGITS.get_or_init(|| Regex::new(r"\d+").ok()).as_ref()?;
    re.find(text).and_then(|m| m.as_str().parse().ok())
}

/// One cell of a duration partition, covering `min..=max` (open when
/// `max` is `None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationBucket {
    /// Short label, e.g. "4-6"
    pub label: String,

    /// Label used in output rows when durations are collapsed, e.g. "6 months"
    pub display: String,

    /// Smallest duration in the bucket
    pub min: u32,

    /// Largest duration in the bucket (inclusive); `None` = unbounded
    pub max: Option<u32>,
}

impl DurationBucket {
    /// Create a bounded bucket.
    pub fn range(label: impl Into<String>, display: impl Into<String>, min: u32, max: u32) -> Self {
        Self {
            label: label.into(),
            display: display.into(),
            min,
            max: Some(max),
        }
    }

    /// Create a bucket with no upper bound.
    pub fn open(label: impl Into<String>, display: impl Into<String>, min: u32) -> Self {
        Self {
            label: label.into(),
            display: display.into(),
            min,
            max: None,
        }
    }

    /// Whether `value` falls in this bucket.
    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && self.max.map_or(true, |max| value <= max)
    }

    /// The duration used when a backfill request targets this bucket.
    pub fn representative(&self) -> u32 {
        self.min
    }
}

/// Where a duration string lands in a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketPlacement {
    /// Inside the bucket at this index
    Bucket(usize),
    /// Parsed, but no bucket contains the value
    Outside(u32),
    /// No number in the text
    Unparsed,
}

impl BucketPlacement {
    /// Bucket index, if placed.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Bucket(i) => Some(*i),
            _ => None,
        }
    }
}

/// A fixed, ordered, non-overlapping set of duration buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationPartition {
    buckets: Vec<DurationBucket>,
}

impl DurationPartition {
    /// Build a partition; buckets are ordered by their lower bound.
    pub fn new(mut buckets: Vec<DurationBucket>) -> Self {
        buckets.sort_by_key(|b| b.min);
        Self { buckets }
    }

    /// Monthly partition: 1, 2-3, 4-6, 7-9, 10+.
    pub fn monthly() -> Self {
        Self::new(vec![
            DurationBucket::range("1", "1 month", 1, 1),
            DurationBucket::range("2-3", "3 months", 2, 3),
            DurationBucket::range("4-6", "6 months", 4, 6),
            DurationBucket::range("7-9", "9 months", 7, 9),
            DurationBucket::open("10+", "12 months", 10),
        ])
    }

    /// A partition with one bucket per listed value, in the given order.
    pub fn exact(values: &[(u32, &str)]) -> Self {
        Self::new(
            values
                .iter()
                .map(|(v, display)| DurationBucket::range(v.to_string(), *display, *v, *v))
                .collect(),
        )
    }

    /// Buckets in partition order.
    pub fn buckets(&self) -> &[DurationBucket] {
        &self.buckets
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the partition has no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Bucket index holding a numeric duration.
    pub fn bucket_of(&self, value: u32) -> Option<usize> {
        self.buckets.iter().position(|b| b.contains(value))
    }

    /// Place a free-text duration.
    pub fn place(&self, text: &str) -> BucketPlacement {
        match leading_number(text) {
            None => BucketPlacement::Unparsed,
            Some(n) => match self.bucket_of(n) {
                Some(i) => BucketPlacement::Bucket(i),
                None => BucketPlacement::Outside(n),
            },
        }
    }

    /// Get a bucket by index.
    pub fn get(&self, index: usize) -> Option<&DurationBucket> {
        self.buckets.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("10 Months"), Some(10));
        assert_eq!(leading_number("  3\u{a0}months"), Some(3));
        assert_eq!(leading_number("from 12 to 13"), Some(12));
        assert_eq!(leading_number("monthly"), None);
        assert_eq!(leading_number(""), None);
    }

    #[test]
    fn test_monthly_placement() {
        let p = DurationPartition::monthly();
        assert_eq!(p.place("1 month"), BucketPlacement::Bucket(0));
        assert_eq!(p.place("3 months"), BucketPlacement::Bucket(1));
        assert_eq!(p.place("5 months"), BucketPlacement::Bucket(2));
        assert_eq!(p.place("9 months"), BucketPlacement::Bucket(3));
        assert_eq!(p.place("24 months"), BucketPlacement::Bucket(4));
        assert_eq!(p.place("0 months"), BucketPlacement::Outside(0));
        assert_eq!(p.place("flexible"), BucketPlacement::Unparsed);
    }

    #[test]
    fn test_representatives_are_bucket_minimums() {
        let reps: Vec<u32> = DurationPartition::monthly()
            .buckets()
            .iter()
            .map(DurationBucket::representative)
            .collect();
        assert_eq!(reps, vec![1, 2, 4, 7, 10]);
    }

    #[test]
    fn test_exact_partition_orders_by_value() {
        let p = DurationPartition::exact(&[(9, "9 months"), (1, "1 month"), (3, "3 months")]);
        let labels: Vec<&str> = p.buckets().iter().map(|b| b.display.as_str()).collect();
        assert_eq!(labels, vec!["1 month", "3 months", "9 months"]);
        assert_eq!(p.place("2 months"), BucketPlacement::Outside(2));
    }
}
