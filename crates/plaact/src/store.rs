use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, WriterBuilder};

use crate::date::normalize;
use crate::reconcile::Reconciler;
use crate::types::{Dataset, OverrideRecord, Record};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Unsupported layout in {path}: {reason}")]
    Schema { path: PathBuf, reason: String },
}

/// Persistence for the reconciled dataset. A run loads one snapshot at the
/// start and replaces it at the end.
pub trait DatasetStore {
    fn load(&self) -> Result<Dataset, StoreError>;
    fn save(&self, dataset: &Dataset) -> Result<(), StoreError>;
}

pub const HEADER: [&str; 4] = ["date", "title", "content", "source_url"];

/// On-disk table layouts, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// `date,content`
    Legacy,
    /// `date,title,content,source_url`
    Canonical,
}

impl Schema {
    pub fn version(&self) -> u32 {
        match self {
            Schema::Legacy => 1,
            Schema::Canonical => 2,
        }
    }

    /// Guesses the layout of a headerless file from its most common row
    /// width. Legacy bodies with stray commas spill into extra fields, so any
    /// width of two or more other than four reads as legacy.
    fn detect(rows: &[StringRecord]) -> Option<Self> {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for row in rows {
            *counts.entry(row.len()).or_default() += 1;
        }
        let (&width, _) = counts.iter().rev().max_by_key(|&(_, count)| *count)?;
        match width {
            4 => Some(Schema::Canonical),
            w if w >= 2 => Some(Schema::Legacy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColumnMap {
    date: usize,
    title: Option<usize>,
    content: usize,
    source_url: Option<usize>,
    /// Legacy rows with stray commas spill the body over trailing fields.
    content_spills: bool,
}

impl ColumnMap {
    fn for_schema(schema: Schema) -> Self {
        match schema {
            Schema::Legacy => ColumnMap {
                date: 0,
                title: None,
                content: 1,
                source_url: None,
                content_spills: true,
            },
            Schema::Canonical => ColumnMap {
                date: 0,
                title: Some(1),
                content: 2,
                source_url: Some(3),
                content_spills: false,
            },
        }
    }

    fn from_header(header: &StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            header
                .iter()
                .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
        };
        let date = find(&["date", "日期"])?;
        let content = find(&["content", "body", "內容"])?;
        let title = find(&["title", "標題"]);
        let source_url = find(&["source_url", "url", "來源"]);
        Some(ColumnMap {
            date,
            title,
            content,
            source_url,
            content_spills: header.len() == 2,
        })
    }

    fn record(&self, row: &StringRecord) -> Option<Record> {
        let field = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let raw_date = row.get(self.date)?.trim().to_string();
        let body = if self.content_spills && row.len() > self.content + 1 {
            row.iter().skip(self.content).collect::<Vec<_>>().join(",")
        } else if let Some(body) = row.get(self.content) {
            body.to_string()
        } else {
            log::warn!("Dropping row dated '{}': no content column", raw_date);
            return None;
        };

        match normalize(&raw_date) {
            Ok(date) => Some(Record {
                date,
                title: field(self.title),
                body: body.trim().to_string(),
                source_url: field(self.source_url),
            }),
            Err(e) => {
                log::warn!("Dropping row dated '{}': {}", raw_date, e);
                None
            }
        }
    }
}

fn is_header(row: &StringRecord) -> bool {
    row.get(0)
        .map(|first| matches!(first.trim().to_lowercase().as_str(), "date" | "日期"))
        .unwrap_or(false)
}

/// Reads every record of a dataset or override file, migrating the legacy
/// two-column layout to full records. The header row is optional.
pub fn read_records(path: &Path) -> Result<Vec<Record>, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = reader
        .records()
        .filter(|row| {
            row.as_ref()
                .map(|r| !r.iter().all(|f| f.trim().is_empty()))
                .unwrap_or(true)
        })
        .collect::<Result<Vec<_>, _>>()?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let columns = if is_header(&rows[0]) {
        let header = rows.remove(0);
        ColumnMap::from_header(&header).ok_or_else(|| StoreError::Schema {
            path: path.to_path_buf(),
            reason: "header lacks a date or content column".to_string(),
        })?
    } else {
        let schema = Schema::detect(&rows).ok_or_else(|| StoreError::Schema {
            path: path.to_path_buf(),
            reason: "single-column rows without a header".to_string(),
        })?;
        log::debug!("{} uses schema v{}", path.display(), schema.version());
        ColumnMap::for_schema(schema)
    };

    Ok(rows.iter().filter_map(|row| columns.record(row)).collect())
}

/// Writes records in the canonical layout, replacing `path` in one rename.
pub fn write_records(path: &Path, records: &[Record]) -> Result<(), StoreError> {
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written =
        write_canonical(&tmp, records).and_then(|()| fs::rename(&tmp, path).map_err(io_err));
    if written.is_err() && tmp.exists() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

fn write_canonical(tmp: &Path, records: &[Record]) -> Result<(), StoreError> {
    let mut writer = WriterBuilder::new().from_path(tmp)?;
    writer.write_record(HEADER)?;
    for record in records {
        writer.write_record([
            record.date.to_string().as_str(),
            record.title.as_str(),
            record.body.as_str(),
            record.source_url.as_str(),
        ])?;
    }
    writer.flush().map_err(|source| StoreError::Io {
        path: tmp.to_path_buf(),
        source,
    })
}

/// Loads the manual override file. A missing file means no overrides.
pub fn load_overrides(path: &Path) -> Result<Vec<OverrideRecord>, StoreError> {
    if !path.exists() {
        log::warn!("Override file {} not found, using crawled data only", path.display());
        return Ok(Vec::new());
    }
    let overrides = read_records(path)?;
    log::info!("Loaded {} override(s) from {}", overrides.len(), path.display());
    Ok(overrides)
}

#[derive(Debug, Clone)]
pub struct CsvStore {
    path: PathBuf,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetStore for CsvStore {
    fn load(&self) -> Result<Dataset, StoreError> {
        if !self.path.exists() {
            log::info!("No dataset at {}, starting empty", self.path.display());
            return Ok(Dataset::default());
        }
        let records = read_records(&self.path)?;
        let raw = records.len();
        let dataset = Reconciler::default().merge(Dataset::default(), records, Vec::new());
        if dataset.len() < raw {
            log::warn!(
                "{} duplicate date(s) collapsed while loading {}",
                raw - dataset.len(),
                self.path.display()
            );
        }
        Ok(dataset)
    }

    fn save(&self, dataset: &Dataset) -> Result<(), StoreError> {
        write_records(&self.path, dataset.records())?;
        log::info!("Wrote {} record(s) to {}", dataset.len(), self.path.display());
        Ok(())
    }
}
