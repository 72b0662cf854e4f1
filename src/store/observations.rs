//! Observation storage with filtering, pagination and aggregate statistics
//!
//! Observations are kept in memory and, when a data directory is configured,
//! appended to `observations.jsonl` so they survive restarts.

use crate::error::StoreError;
use crate::events::{Observation, Timestamp, SUCCESS_STATUS_CEILING};
use crate::store::Journal;
use log::info;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;
use std::str::FromStr;
use std::sync::RwLock;

const JOURNAL_NAME: &str = "observations.jsonl";

/// Status predicate for observation queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    /// Status below 400
    Success,
    /// Status 400 or above
    Error,
    /// Exactly this status
    Exact(u16),
    /// Status at or above this value
    AtLeast(u16),
    /// Status strictly below this value
    Below(u16),
}

impl StatusFilter {
    pub fn matches(&self, status: u16) -> bool {
        match *self {
            StatusFilter::Success => status < SUCCESS_STATUS_CEILING,
            StatusFilter::Error => status >= SUCCESS_STATUS_CEILING,
            StatusFilter::Exact(code) => status == code,
            StatusFilter::AtLeast(code) => status >= code,
            StatusFilter::Below(code) => status < code,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    /// Parse the `status` query parameter: `success`, `error` or a status code
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(StatusFilter::Success),
            "error" => Ok(StatusFilter::Error),
            other => other
                .parse::<u16>()
                .map(StatusFilter::Exact)
                .map_err(|_| format!("Invalid status filter: '{}'", s)),
        }
    }
}

/// Predicate shared by queries and statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilter {
    /// Inclusive lower bound on the timestamp
    pub start: Option<Timestamp>,
    /// Inclusive upper bound on the timestamp
    pub end: Option<Timestamp>,
    pub status: Option<StatusFilter>,
    /// Only observations at least this slow
    pub min_latency_ms: Option<f64>,
}

impl ObservationFilter {
    pub fn matches(&self, observation: &Observation) -> bool {
        if self.start.is_some_and(|start| observation.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| observation.timestamp > end) {
            return false;
        }
        if let Some(status) = self.status {
            if !status.matches(observation.status) {
                return false;
            }
        }
        if self
            .min_latency_ms
            .is_some_and(|min| observation.latency_ms < min)
        {
            return false;
        }
        true
    }
}

/// Field used to order search results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Timestamp,
    LatencyMs,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// A filtered, sorted and limited search
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationQuery {
    pub filter: ObservationFilter,
    pub sort: SortField,
    pub order: SortOrder,
    pub limit: usize,
}

/// One page of results plus the size of the full filtered set
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

impl<T> Page<T> {
    /// Number of pages needed for the full result set
    pub fn pages(&self) -> usize {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

/// Aggregate statistics over a filtered set of observations
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObservationStats {
    pub total_logs: usize,
    /// Mean latency in whole milliseconds
    pub avg_latency: u64,
    /// Percentage of successful probes, 0 to 100
    pub success_rate: u32,
}

impl ObservationStats {
    fn from_observations<'a>(observations: impl Iterator<Item = &'a Observation>) -> Self {
        let mut total = 0usize;
        let mut successes = 0usize;
        let mut latency_sum = 0.0;

        for observation in observations {
            total += 1;
            latency_sum += observation.latency_ms;
            if observation.is_success() {
                successes += 1;
            }
        }

        if total == 0 {
            return Self::default();
        }

        Self {
            total_logs: total,
            avg_latency: (latency_sum / total as f64).round().max(0.0) as u64,
            success_rate: ((successes as f64 / total as f64) * 100.0).round() as u32,
        }
    }
}

/// Store of immutable probe observations
#[derive(Debug, Default)]
pub struct ObservationStore {
    records: RwLock<Vec<Observation>>,
    journal: Option<Journal>,
}

impl ObservationStore {
    /// Create an in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a journaled store in `dir`, replaying existing observations
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let (journal, records) = Journal::open_with_records::<Observation>(dir, JOURNAL_NAME)?;
        info!("Loaded {} observations from {}", records.len(), journal.path().display());
        Ok(Self {
            records: RwLock::new(records),
            journal: Some(journal),
        })
    }

    /// Create a store that writes through the given journal without replaying it
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            journal: Some(journal),
        }
    }

    /// Persist a new observation
    ///
    /// The journal is written first; if that fails the observation is not
    /// added and the error is returned.
    pub fn append(&self, observation: Observation) -> Result<(), StoreError> {
        if let Some(journal) = &self.journal {
            journal.append(&observation)?;
        }
        self.records.write().unwrap().push(observation);
        Ok(())
    }

    /// Number of stored observations
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Filtered observations, newest first, paginated by offset
    ///
    /// `page` is 1-based. The returned total counts the whole filtered set.
    pub fn query(&self, filter: &ObservationFilter, page: usize, page_size: usize) -> Page<Observation> {
        let page = page.max(1);
        let records = self.records.read().unwrap();

        let mut matching: Vec<&Observation> = records.iter().filter(|o| filter.matches(o)).collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        Page {
            items,
            total,
            page,
            page_size,
        }
    }

    /// Statistics over every observation matching the filter
    pub fn stats(&self, filter: &ObservationFilter) -> ObservationStats {
        let records = self.records.read().unwrap();
        ObservationStats::from_observations(records.iter().filter(|o| filter.matches(o)))
    }

    /// Run a sorted and limited search
    pub fn search(&self, query: &ObservationQuery) -> Vec<Observation> {
        let records = self.records.read().unwrap();

        let mut matching: Vec<&Observation> =
            records.iter().filter(|o| query.filter.matches(o)).collect();
        matching.sort_by(|a, b| {
            let ordering = compare_by(a, b, query.sort);
            match query.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        matching.into_iter().take(query.limit).cloned().collect()
    }
}

fn compare_by(a: &Observation, b: &Observation, field: SortField) -> Ordering {
    match field {
        SortField::Timestamp => a.timestamp.cmp(&b.timestamp),
        SortField::LatencyMs => a.latency_ms.total_cmp(&b.latency_ms),
        SortField::Status => a.status.cmp(&b.status),
    }
}


#[cfg(test)]
mod property_tests {
    use super::tests::observation_at;
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    #[derive(Debug, Clone)]
    struct ObservationSet(Vec<(i64, u16, f64)>);

    impl Arbitrary for ObservationSet {
        fn arbitrary(g: &mut Gen) -> Self {
            let statuses = [200, 201, 204, 301, 400, 404, 429, 500, 502, 503];
            let count = usize::arbitrary(g) % 40;
            let entries = (0..count)
                .map(|_| {
                    let minutes_ago = (u16::arbitrary(g) % 600) as i64;
                    let status = *g.choose(&statuses).unwrap();
                    let latency = (u32::arbitrary(g) % 5000) as f64 / 3.0;
                    (minutes_ago, status, latency)
                })
                .collect();
            Self(entries)
        }
    }

    #[derive(Debug, Clone)]
    struct ArbitraryFilter(ObservationFilter);

    impl Arbitrary for ArbitraryFilter {
        fn arbitrary(g: &mut Gen) -> Self {
            let now = chrono::Utc::now();
            let start = bool::arbitrary(g)
                .then(|| now - chrono::Duration::minutes((u16::arbitrary(g) % 600) as i64));
            let end = bool::arbitrary(g)
                .then(|| now - chrono::Duration::minutes((u16::arbitrary(g) % 600) as i64));
            let status = match u8::arbitrary(g) % 4 {
                0 => None,
                1 => Some(StatusFilter::Success),
                2 => Some(StatusFilter::Error),
                _ => Some(StatusFilter::Exact(*g.choose(&[200u16, 404, 500]).unwrap())),
            };
            Self(ObservationFilter {
                start,
                end,
                status,
                min_latency_ms: None,
            })
        }
    }

    fn build_store(set: &ObservationSet) -> ObservationStore {
        let store = ObservationStore::new();
        for &(minutes_ago, status, latency) in &set.0 {
            store.append(observation_at(minutes_ago, status, latency)).unwrap();
        }
        store
    }

    // Stats and pagination must agree on the size of the filtered set
    #[quickcheck]
    fn prop_stats_total_matches_query_total(set: ObservationSet, filter: ArbitraryFilter, page: u8) -> bool {
        let store = build_store(&set);
        let page_size = 7;
        let stats = store.stats(&filter.0);
        let page = store.query(&filter.0, page as usize + 1, page_size);
        stats.total_logs == page.total
    }

    #[quickcheck]
    fn prop_success_rate_in_range(set: ObservationSet, filter: ArbitraryFilter) -> bool {
        let store = build_store(&set);
        let stats = store.stats(&filter.0);
        stats.success_rate <= 100 && (stats.total_logs > 0 || stats.success_rate == 0)
    }

    #[quickcheck]
    fn prop_query_pages_are_newest_first(set: ObservationSet) -> bool {
        let store = build_store(&set);
        let page = store.query(&ObservationFilter::default(), 1, 50);
        page.items
            .windows(2)
            .all(|pair| pair[0].timestamp >= pair[1].timestamp)
    }
}
