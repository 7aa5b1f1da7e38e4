// 📊 Aggregation - grouped sums over normalized records
//
// Keys live in a BTreeMap while summing, so output order is the key order:
// chronological for periods, lexicographic for regions and categories.

use crate::records::NormalizedRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// FILTERS & GROUPING
// ============================================================================

/// Exact-match predicates; None accepts every value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub region: Option<String>,
    pub canonical_label: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &NormalizedRecord) -> bool {
        self.year.map_or(true, |y| record.year() == y)
            && self.month.map_or(true, |m| record.month() == m)
            && self
                .region
                .as_deref()
                .map_or(true, |r| record.canonical_region == r)
            && self
                .canonical_label
                .as_deref()
                .map_or(true, |l| record.canonical_label == l)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    YearMonth,
    Region,
    Category,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum GroupKey {
    Period { year: i32, month: u32 },
    Region(String),
    Category(String),
    All,
}

impl GroupKey {
    /// "YYYY-MM" for periods, the name for regions/categories
    pub fn label(&self) -> String {
        match self {
            GroupKey::Period { year, month } => format!("{:04}-{:02}", year, month),
            GroupKey::Region(r) => r.clone(),
            GroupKey::Category(c) => c.clone(),
            GroupKey::All => "total".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedPoint {
    pub key: GroupKey,
    pub total_quantity: f64,
}

// ============================================================================
// AGGREGATION
// ============================================================================

fn group_key(record: &NormalizedRecord, group_by: GroupBy) -> GroupKey {
    match group_by {
        GroupBy::YearMonth => GroupKey::Period {
            year: record.year(),
            month: record.month(),
        },
        GroupBy::Region => GroupKey::Region(record.canonical_region.clone()),
        GroupBy::Category => GroupKey::Category(record.canonical_label.clone()),
        GroupBy::None => GroupKey::All,
    }
}

/// Sum quantities per group key, ascending by key
pub fn aggregate(
    records: &[NormalizedRecord],
    filter: &RecordFilter,
    group_by: GroupBy,
) -> Vec<AggregatedPoint> {
    let mut buckets: BTreeMap<GroupKey, f64> = BTreeMap::new();

    for record in records.iter().filter(|r| filter.matches(r)) {
        *buckets.entry(group_key(record, group_by)).or_insert(0.0) += record.quantity();
    }

    buckets
        .into_iter()
        .map(|(key, total_quantity)| AggregatedPoint {
            key,
            total_quantity,
        })
        .collect()
}

/// Total over all matching records (0 when nothing matches)
pub fn total(records: &[NormalizedRecord], filter: &RecordFilter) -> f64 {
    records
        .iter()
        .filter(|r| filter.matches(r))
        .map(|r| r.quantity())
        .sum()
}

/// Year -> total
pub fn annual_totals(records: &[NormalizedRecord], filter: &RecordFilter) -> BTreeMap<i32, f64> {
    let mut totals = BTreeMap::new();
    for record in records.iter().filter(|r| filter.matches(r)) {
        *totals.entry(record.year()).or_insert(0.0) += record.quantity();
    }
    totals
}

/// (year, month) -> total
pub fn monthly_totals(
    records: &[NormalizedRecord],
    filter: &RecordFilter,
) -> BTreeMap<(i32, u32), f64> {
    let mut totals = BTreeMap::new();
    for record in records.iter().filter(|r| filter.matches(r)) {
        *totals
            .entry((record.year(), record.month()))
            .or_insert(0.0) += record.quantity();
    }
    totals
}

/// Region totals, largest first; ties keep region order
pub fn ranking(records: &[NormalizedRecord], filter: &RecordFilter) -> Vec<AggregatedPoint> {
    let mut points = aggregate(records, filter, GroupBy::Region);
    // stable sort over the lexicographic order from aggregate()
    points.sort_by(|a, b| b.total_quantity.total_cmp(&a.total_quantity));
    points
}

// ============================================================================
// TESTS
// ============================================================================
