use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::date::CanonicalDate;
use crate::types::{Dataset, OverrideRecord, Record};

#[derive(Debug, thiserror::Error)]
#[error("Invalid sort order '{0}'. Accepted values: 'asc', 'desc'")]
pub struct SortOrderParseError(String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = SortOrderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            _ => Err(SortOrderParseError(s.to_string())),
        }
    }
}

impl Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "ascending"),
            SortOrder::Descending => write!(f, "descending"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler {
    order: SortOrder,
}

impl Reconciler {
    pub fn new(order: SortOrder) -> Self {
        Self { order }
    }

    /// Merges crawled data with manual overrides into a dataset that is
    /// unique by date.
    ///
    /// Harvested records replace existing ones for the same date. An override
    /// replaces every crawled record for its date; when the override list
    /// itself repeats a date, the first entry is kept.
    pub fn merge(
        &self,
        existing: Dataset,
        harvested: Vec<Record>,
        overrides: Vec<OverrideRecord>,
    ) -> Dataset {
        let mut candidates: BTreeMap<CanonicalDate, Record> = BTreeMap::new();
        for record in existing.into_records().into_iter().chain(harvested) {
            candidates.insert(record.date, record);
        }

        let mut override_dates = HashSet::new();
        let mut kept_overrides = Vec::with_capacity(overrides.len());
        for record in overrides {
            if override_dates.insert(record.date) {
                kept_overrides.push(record);
            } else {
                log::warn!("Duplicate override for {}, keeping the first one", record.date);
            }
        }

        candidates.retain(|date, _| !override_dates.contains(date));

        let mut records: Vec<Record> = candidates.into_values().chain(kept_overrides).collect();
        match self.order {
            SortOrder::Ascending => records.sort_by_key(|r| r.date),
            SortOrder::Descending => records.sort_by(|a, b| b.date.cmp(&a.date)),
        }

        Dataset::from_reconciled(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::date::normalize;

    fn record(date: &str, body: &str) -> Record {
        Record {
            date: normalize(date).unwrap(),
            title: String::new(),
            body: body.to_string(),
            source_url: String::new(),
        }
    }

    fn bodies(dataset: &Dataset) -> Vec<(String, String)> {
        dataset
            .records()
            .iter()
            .map(|r| (r.date.to_string(), r.body.clone()))
            .collect()
    }

    fn is_unique(dataset: &Dataset) -> bool {
        dataset.dates().len() == dataset.len()
    }

    #[test]
    fn test_merge_scenario() {
        let existing = Reconciler::default().merge(
            Dataset::default(),
            vec![record("2024-01-01", "A")],
            vec![],
        );
        let merged = Reconciler::default().merge(
            existing,
            vec![record("2024-01-01", "B"), record("2024-01-02", "C")],
            vec![record("2024-01-02", "D")],
        );

        assert_eq!(
            bodies(&merged),
            vec![
                ("2024-01-01".to_string(), "B".to_string()),
                ("2024-01-02".to_string(), "D".to_string()),
            ]
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let reconciler = Reconciler::new(SortOrder::Descending);
        let once = reconciler.merge(
            Dataset::default(),
            vec![
                record("113.05.01", "x"),
                record("2024-05-01", "y"),
                record("2024-04-30", "z"),
            ],
            vec![record("2024-04-29", "manual")],
        );
        let twice = reconciler.merge(once.clone(), vec![], vec![]);
        assert_eq!(once, twice);
        assert!(is_unique(&twice));
    }

    #[test]
    fn test_override_replaces_record_wholesale() {
        let mut crawled = record("2024-03-01", "crawled");
        crawled.title = "crawled title".to_string();
        crawled.source_url = "https://www.mnd.gov.tw/news/plaact/1".to_string();
        let manual = record("113/03/01", "manual");

        let merged =
            Reconciler::default().merge(Dataset::default(), vec![crawled], vec![manual.clone()]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get(manual.date), Some(&manual));
    }

    #[test]
    fn test_duplicate_overrides_keep_first() {
        let merged = Reconciler::default().merge(
            Dataset::default(),
            vec![],
            vec![record("2024-02-02", "first"), record("2024-02-02", "second")],
        );
        assert_eq!(
            bodies(&merged),
            vec![("2024-02-02".to_string(), "first".to_string())]
        );
    }

    #[test]
    fn test_harvested_duplicates_last_wins() {
        let merged = Reconciler::default().merge(
            Dataset::default(),
            vec![record("2024-02-02", "older"), record("2024-02-02", "newer")],
            vec![],
        );
        assert_eq!(merged.records()[0].body, "newer");
    }

    #[test]
    fn test_sort_order() {
        let harvested = vec![
            record("2024-01-03", "c"),
            record("2024-01-01", "a"),
            record("2024-01-02", "b"),
        ];
        let asc = Reconciler::new(SortOrder::Ascending).merge(
            Dataset::default(),
            harvested.clone(),
            vec![],
        );
        let desc =
            Reconciler::new(SortOrder::Descending).merge(Dataset::default(), harvested, vec![]);

        let asc_bodies: Vec<_> = asc.records().iter().map(|r| r.body.as_str()).collect();
        let desc_bodies: Vec<_> = desc.records().iter().map(|r| r.body.as_str()).collect();
        assert_eq!(asc_bodies, ["a", "b", "c"]);
        assert_eq!(desc_bodies, ["c", "b", "a"]);
    }

    #[test]
    fn test_sort_order_from_str() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert_eq!("descending".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
