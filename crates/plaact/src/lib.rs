pub mod config;
pub mod date;
pub mod extract;
pub mod fetcher;
pub mod listing;
pub mod pipeline;
pub mod reconcile;
pub mod store;
pub mod types;

pub use config::CrawlerConfig;
pub use fetcher::{Fetch, HttpFetcher};
pub use pipeline::{Pipeline, RunMode};

pub(crate) const BASE_URL: &str = "https://www.mnd.gov.tw";
