use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::config::CrawlerConfig;
use crate::fetcher::{Fetch, FetchError};
use crate::types::ListingEntry;

#[derive(Debug, thiserror::Error)]
#[error("Listing page {page} unavailable: {source}")]
pub struct PageFailure {
    pub page: u32,
    #[source]
    pub source: FetchError,
}

static RE_ROC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{3}\.\d{2}\.\d{2}").expect("invalid regex: roc date"));

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("invalid selector: anchor"));

fn elem_text(element: ElementRef) -> String {
    element.text().collect::<String>()
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Address of a 1-based listing page; page 1 is the bare listing address.
pub fn list_url(list_base: &str, page: u32) -> String {
    let base = list_base.trim_end_matches('/');
    if page <= 1 {
        base.to_string()
    } else {
        format!("{}/{}", base, page)
    }
}

/// Keeps the anchors whose text names one of the report keywords and
/// carries a `DDD.DD.DD` date.
pub fn parse_listing(html: &str, base_url: &Url, keywords: &[String]) -> Vec<ListingEntry> {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let title = normalize_whitespace(&elem_text(anchor));
        if !keywords
            .iter()
            .any(|kw| !kw.is_empty() && title.contains(kw.as_str()))
        {
            continue;
        }

        let Some(raw_date) = RE_ROC_DATE.find(&title).map(|m| m.as_str().to_string()) else {
            log::debug!("Skipping undated listing '{}'", title);
            continue;
        };

        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let detail_url = match base_url.join(href.trim()) {
            Ok(url) => url.to_string(),
            Err(e) => {
                log::debug!("Skipping listing '{}' with bad href '{}': {}", title, href, e);
                continue;
            }
        };

        entries.push(ListingEntry {
            raw_date,
            detail_url,
            title,
        });
    }

    entries
}

/// Reads single listing pages through a [`Fetch`] implementation.
#[derive(Debug)]
pub struct ListingScanner<'a, F> {
    config: &'a CrawlerConfig,
    fetcher: &'a F,
    base_url: Url,
}

impl<'a, F: Fetch> ListingScanner<'a, F> {
    pub fn new(config: &'a CrawlerConfig, fetcher: &'a F) -> Result<Self, url::ParseError> {
        Ok(Self {
            config,
            fetcher,
            base_url: Url::parse(&config.base_url)?,
        })
    }

    pub fn page_url(&self, page: u32) -> String {
        list_url(&self.config.list_base(), page)
    }

    pub async fn scan_page(&self, page: u32) -> Result<Vec<ListingEntry>, PageFailure> {
        let url = self.page_url(page);
        log::info!("Scanning listing page {}: {}", page, url);

        let html = self
            .fetcher
            .fetch(&url, &self.config.listing_retry)
            .await
            .map_err(|source| PageFailure { page, source })?;

        let entries = parse_listing(&html, &self.base_url, &self.config.keywords);
        log::info!("Listing page {} has {} matching entries", page, entries.len());
        Ok(entries)
    }
}
