use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extract::{EndMarker, MarkerCut};
use crate::reconcile::SortOrder;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Title variants the publisher has used over the years for the same daily
/// report.
pub const DEFAULT_KEYWORDS: [&str; 8] = [
    "中共解放軍臺海周邊海、空域動態",
    "中共解放軍軍機",
    "中共解放軍進入我西南空域活動情況",
    "踰越海峽中線及進入我西南空域活動情況",
    "逾越海峽中線及進入我西南空域活動情況",
    "我西南空域空情動態",
    "臺海周邊空域空情動態",
    "偵獲共機、艦在臺海周邊活動情形",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub backoff_base_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout_secs: u64, backoff_base_ms: u64) -> Self {
        Self {
            max_retries,
            timeout_secs,
            backoff_base_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Wait after the given 1-based failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 30, 2_000)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub base_url: String,
    pub list_path: String,
    pub keywords: Vec<String>,
    pub start_markers: Vec<String>,
    pub end_markers: Vec<EndMarker>,
    pub content_selector: Option<String>,
    pub listing_retry: RetryPolicy,
    pub detail_retry: RetryPolicy,
    pub page_delay_ms: u64,
    pub detail_delay_ms: u64,
    pub empty_streak_threshold: u32,
    pub max_pages: u32,
    pub incremental_pages: u32,
    pub sort_order: SortOrder,
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        let keywords: Vec<String> = DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect();
        Self {
            base_url: crate::BASE_URL.to_string(),
            list_path: "/news/plaactlist".to_string(),
            start_markers: keywords.clone(),
            keywords,
            end_markers: vec![
                EndMarker::new("並派遣任務機、艦及岸置飛彈系統嚴密監控與應處。", MarkerCut::After),
                EndMarker::new("並派遣任務機、艦及岸置飛彈系統監控應處。", MarkerCut::After),
                EndMarker::new("下載專區", MarkerCut::Before),
                EndMarker::new("附件下載", MarkerCut::Before),
            ],
            content_selector: Some("div.maincontent".to_string()),
            listing_retry: RetryPolicy::new(5, 40, 2_000),
            detail_retry: RetryPolicy::new(3, 30, 2_000),
            page_delay_ms: 1_000,
            detail_delay_ms: 500,
            empty_streak_threshold: 3,
            max_pages: 200,
            incremental_pages: 3,
            sort_order: SortOrder::Ascending,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X)".to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: CrawlerConfig = serde_json::from_str(&content)?;
        config.validate()
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "Base URL '{}' is not absolute",
                self.base_url
            )));
        }
        if self.keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::Invalid("Keyword list is empty".to_string()));
        }
        if self.start_markers.iter().all(|m| m.is_empty()) {
            return Err(ConfigError::Invalid("Start marker list is empty".to_string()));
        }
        if self.end_markers.iter().any(|m| m.text.is_empty()) {
            return Err(ConfigError::Invalid("End markers must not be empty".to_string()));
        }
        if self.empty_streak_threshold == 0 {
            return Err(ConfigError::Invalid(
                "Empty streak threshold must be greater than 0".to_string(),
            ));
        }
        if self.listing_retry.max_retries == 0 || self.detail_retry.max_retries == 0 {
            return Err(ConfigError::Invalid(
                "Retry count must be greater than 0".to_string(),
            ));
        }
        if self.max_pages == 0 || self.incremental_pages == 0 {
            return Err(ConfigError::Invalid(
                "Page ceilings must be greater than 0".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn list_base(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.list_path.trim_matches('/')
        )
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn detail_delay(&self) -> Duration {
        Duration::from_millis(self.detail_delay_ms)
    }
}
