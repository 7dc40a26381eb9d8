use std::collections::HashSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::date::CanonicalDate;

/// An anchor on a listing page that matched one of the report keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingEntry {
    pub raw_date: String,
    pub detail_url: String,
    pub title: String,
}

impl Display for ListingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}\n     {}", self.raw_date, self.title, self.detail_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub date: CanonicalDate,
    pub title: String,
    pub body: String,
    pub source_url: String,
}

/// A manually curated record. Always replaces crawled data for its date.
pub type OverrideRecord = Record;

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "┌─ {} ─ {}", self.date, self.title)?;
        if !self.source_url.is_empty() {
            writeln!(f, "│  {}", self.source_url)?;
        }
        write!(f, "└─ {}", self.body)
    }
}

/// Records ordered by date. Only [`crate::reconcile::Reconciler`] builds a
/// dataset, which keeps it unique by date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub(crate) fn from_reconciled(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, date: CanonicalDate) -> Option<&Record> {
        self.records.iter().find(|r| r.date == date)
    }

    pub fn dates(&self) -> HashSet<CanonicalDate> {
        self.records.iter().map(|r| r.date).collect()
    }

    pub fn source_urls(&self) -> HashSet<String> {
        self.records
            .iter()
            .filter(|r| !r.source_url.is_empty())
            .map(|r| r.source_url.clone())
            .collect()
    }
}

#[derive(Debug)]
pub struct DatasetStats {
    pub total: usize,
    pub first: Option<CanonicalDate>,
    pub last: Option<CanonicalDate>,
    pub without_source: usize,
}

impl DatasetStats {
    pub fn from_dataset(dataset: &Dataset) -> DatasetStats {
        DatasetStats {
            total: dataset.len(),
            first: dataset.records().iter().map(|r| r.date).min(),
            last: dataset.records().iter().map(|r| r.date).max(),
            without_source: dataset
                .records()
                .iter()
                .filter(|r| r.source_url.is_empty())
                .count(),
        }
    }
}

impl Display for DatasetStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nDataset:")?;
        writeln!(f, "  Records:             {}", self.total)?;
        if let (Some(first), Some(last)) = (self.first, self.last) {
            writeln!(f, "  Range:               {} – {}", first, last)?;
        }
        writeln!(f, "  Without source URL:  {}", self.without_source)
    }
}
