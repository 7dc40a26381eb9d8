use std::collections::HashSet;
use std::fmt::Display;

use serde::Serialize;

use crate::config::{ConfigError, CrawlerConfig};
use crate::date::{CanonicalDate, normalize};
use crate::extract::DetailExtractor;
use crate::fetcher::Fetch;
use crate::listing::ListingScanner;
use crate::reconcile::Reconciler;
use crate::store::{DatasetStore, StoreError};
use crate::types::{Dataset, ListingEntry, OverrideRecord, Record};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Full,
    Incremental,
}

impl Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Full => write!(f, "full"),
            RunMode::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EmptyStreak,
    PageCeiling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateIssue {
    pub raw_date: String,
    pub detail_url: String,
    pub error: String,
}

/// What one crawl produced and what it had to leave out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub records: Vec<Record>,
    pub pages_scanned: u32,
    pub skipped_pages: Vec<u32>,
    pub failed_details: Vec<String>,
    pub extraction_misses: Vec<String>,
    pub date_errors: Vec<DateIssue>,
    pub stop_reason: StopReason,
}

impl Display for CrawlReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nCrawl:")?;
        writeln!(f, "  Pages scanned:       {}", self.pages_scanned)?;
        writeln!(f, "  Records harvested:   {}", self.records.len())?;
        writeln!(f, "  Skipped pages:       {:?}", self.skipped_pages)?;
        writeln!(f, "  Failed detail pages: {}", self.failed_details.len())?;
        writeln!(f, "  Extraction misses:   {}", self.extraction_misses.len())?;
        writeln!(f, "  Date errors:         {}", self.date_errors.len())?;
        writeln!(f, "  Stopped by:          {:?}", self.stop_reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub report: CrawlReport,
    pub dataset: Dataset,
}

/// Dates and URLs already held by the dataset, skipped by incremental runs.
#[derive(Debug, Default)]
struct Known {
    urls: HashSet<String>,
    dates: HashSet<CanonicalDate>,
}

/// Runs the crawl-extract-reconcile cycle against one dataset store.
#[derive(Debug)]
pub struct Pipeline<F, S> {
    config: CrawlerConfig,
    fetcher: F,
    store: S,
    overrides: Vec<OverrideRecord>,
    extractor: DetailExtractor,
    reconciler: Reconciler,
}

impl<F: Fetch, S: DatasetStore> Pipeline<F, S> {
    pub fn new(
        config: CrawlerConfig,
        fetcher: F,
        store: S,
        overrides: Vec<OverrideRecord>,
    ) -> Result<Self, PipelineError> {
        let config = config.validate()?;
        let extractor = DetailExtractor::from_config(&config);
        let reconciler = Reconciler::new(config.sort_order);
        Ok(Self {
            config,
            fetcher,
            store,
            overrides,
            extractor,
            reconciler,
        })
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Crawls from page 1 until the empty streak or the page ceiling stops
    /// it, then merges everything found.
    pub async fn run_full(&self) -> Result<RunOutcome, PipelineError> {
        let existing = self.store.load()?;
        let report = self.crawl_all(self.config.max_pages).await?;
        self.finish(RunMode::Full, existing, report)
    }

    /// Crawls only the first few pages and skips entries the dataset already
    /// holds, by detail URL or by date.
    pub async fn run_incremental(&self) -> Result<RunOutcome, PipelineError> {
        let existing = self.store.load()?;
        let known = Known {
            urls: existing.source_urls(),
            dates: existing.dates(),
        };
        let report = self.crawl(self.config.incremental_pages, known).await?;
        self.finish(RunMode::Incremental, existing, report)
    }

    pub async fn run(&self, mode: RunMode) -> Result<RunOutcome, PipelineError> {
        match mode {
            RunMode::Full => self.run_full().await,
            RunMode::Incremental => self.run_incremental().await,
        }
    }

    fn finish(
        &self,
        mode: RunMode,
        existing: Dataset,
        report: CrawlReport,
    ) -> Result<RunOutcome, PipelineError> {
        let before = existing.len();
        let dataset = self
            .reconciler
            .merge(existing, report.records.clone(), self.overrides.clone());
        log::info!(
            "{} run merged {} harvested record(s): {} -> {} record(s)",
            mode,
            report.records.len(),
            before,
            dataset.len()
        );
        self.store.save(&dataset)?;
        Ok(RunOutcome {
            mode,
            report,
            dataset,
        })
    }

    /// Harvests listing pages from page 1 without touching the store.
    pub async fn crawl_all(&self, max_pages: u32) -> Result<CrawlReport, PipelineError> {
        self.crawl(max_pages, Known::default()).await
    }

    async fn crawl(&self, max_pages: u32, known: Known) -> Result<CrawlReport, PipelineError> {
        let scanner = ListingScanner::new(&self.config, &self.fetcher)?;
        let mut seen = known.urls;
        let mut report = CrawlReport {
            records: Vec::new(),
            pages_scanned: 0,
            skipped_pages: Vec::new(),
            failed_details: Vec::new(),
            extraction_misses: Vec::new(),
            date_errors: Vec::new(),
            stop_reason: StopReason::PageCeiling,
        };
        let mut empty_streak = 0;

        for page in 1..=max_pages {
            if page > 1 {
                tokio::time::sleep(self.config.page_delay()).await;
            }
            report.pages_scanned = page;

            let entries = match scanner.scan_page(page).await {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("{}, skipping", e);
                    report.skipped_pages.push(page);
                    continue;
                }
            };

            let fresh: Vec<ListingEntry> = entries
                .into_iter()
                .filter(|entry| seen.insert(entry.detail_url.clone()))
                .collect();

            if fresh.is_empty() {
                empty_streak += 1;
                log::info!(
                    "Page {} has no new entries ({} empty in a row)",
                    page,
                    empty_streak
                );
                if empty_streak >= self.config.empty_streak_threshold {
                    log::info!("{} empty pages in a row, stopping", empty_streak);
                    report.stop_reason = StopReason::EmptyStreak;
                    break;
                }
                continue;
            }
            empty_streak = 0;

            for entry in fresh {
                self.process_entry(entry, &known.dates, &mut report).await;
            }
        }

        if !report.skipped_pages.is_empty() {
            log::warn!("Skipped listing pages: {:?}", report.skipped_pages);
        }
        Ok(report)
    }

    async fn process_entry(
        &self,
        entry: ListingEntry,
        known_dates: &HashSet<CanonicalDate>,
        report: &mut CrawlReport,
    ) {
        let date = match normalize(&entry.raw_date) {
            Ok(date) => date,
            Err(e) => {
                log::warn!("Excluding {}: {}", entry.detail_url, e);
                report.date_errors.push(DateIssue {
                    raw_date: entry.raw_date,
                    detail_url: entry.detail_url,
                    error: e.to_string(),
                });
                return;
            }
        };

        if known_dates.contains(&date) {
            log::debug!("Already have {}, skipping {}", date, entry.detail_url);
            return;
        }

        tokio::time::sleep(self.config.detail_delay()).await;
        log::info!("Fetching report {} ({})", date, entry.detail_url);

        let html = match self
            .fetcher
            .fetch(&entry.detail_url, &self.config.detail_retry)
            .await
        {
            Ok(html) => html,
            Err(e) => {
                log::warn!("Leaving {} for a later run: {}", entry.detail_url, e);
                report.failed_details.push(entry.detail_url);
                return;
            }
        };

        let Some(body) = self.extractor.extract(&html) else {
            log::warn!("No report body found at {}", entry.detail_url);
            report.extraction_misses.push(entry.detail_url);
            return;
        };

        report.records.push(Record {
            date,
            title: entry.title,
            body,
            source_url: entry.detail_url,
        });
    }
}
