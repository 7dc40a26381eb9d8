use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use plaact::config::CrawlerConfig;
use plaact::date::normalize;
use plaact::extract::DetailExtractor;
use plaact::fetcher::{Fetch, HttpFetcher};
use plaact::listing::ListingScanner;
use plaact::pipeline::{Pipeline, RunMode};
use plaact::reconcile::SortOrder;
use plaact::store::{CsvStore, load_overrides, write_records};
use plaact::types::DatasetStats;

#[derive(Parser)]
#[command(name = "plaact")]
#[command(about = "An MND PLA activity report crawler", long_about = None)]
struct Cli {
    #[arg(
        short = 'l',
        long = "log-level",
        value_enum,
        default_value = "info",
        global = true,
        help = "Set the logging level"
    )]
    log_level: LogLevel,

    #[arg(
        short = 'c',
        long = "config",
        global = true,
        help = "JSON file overriding the built-in crawler settings"
    )]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Full,
    Incremental,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Full => RunMode::Full,
            Mode::Incremental => RunMode::Incremental,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the listing, merge with the dataset and overrides, and save
    Run {
        #[arg(
            long,
            value_enum,
            env = "PLAACT_MODE",
            default_value = "incremental",
            help = "Rebuild from page 1 or only check the newest pages"
        )]
        mode: Mode,

        #[arg(long, default_value = "pla_daily_clean_full.csv", help = "Dataset CSV to update")]
        dataset: PathBuf,

        #[arg(long, default_value = "manual_gap.csv", help = "Manually curated override CSV")]
        overrides: PathBuf,

        #[arg(long, help = "Also write this run's harvested records to this CSV")]
        latest: Option<PathBuf>,

        #[arg(
            long,
            value_parser = parse_order,
            help = "Sort order of the saved dataset (asc, desc)"
        )]
        order: Option<SortOrder>,

        #[arg(
            long,
            help = "Hard ceiling on listing pages for this run",
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        max_pages: Option<u32>,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Show the report entries found on one listing page
    List {
        #[arg(
            long,
            default_value_t = 1,
            help = "1-based listing page",
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        page: u32,

        #[arg(
            short = 'o',
            long = "output",
            value_enum,
            default_value = "text",
            help = "Output format"
        )]
        format: OutputFormat,
    },
    /// Fetch one report page and print the extracted body
    Detail {
        #[arg(help = "URL of the report page to fetch")]
        url: String,
    },
    /// Print the canonical form of a date such as 111.11.08 or 2025/2/3
    Date {
        #[arg(help = "Date to normalize")]
        raw: String,
    },
}

fn parse_order(s: &str) -> Result<SortOrder, String> {
    SortOrder::from_str(s).map_err(|e| e.to_string())
}

fn serialize_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Error serializing to JSON: {}", e);
            process::exit(1);
        }
    }
}

fn load_config(path: Option<&Path>) -> CrawlerConfig {
    let Some(path) = path else {
        return CrawlerConfig::default();
    };
    CrawlerConfig::from_json_file(path).unwrap_or_else(|e| {
        log::error!("Error loading config {}: {}", path.display(), e);
        process::exit(1);
    })
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level.clone().into())
        .init();

    let mut config = load_config(cli.config.as_deref());

    let fetcher = HttpFetcher::new(&config).unwrap_or_else(|e| {
        log::error!("Error creating fetcher: {}", e);
        process::exit(1);
    });

    match cli.command {
        Commands::Run {
            mode,
            dataset,
            overrides,
            latest,
            order,
            max_pages,
            format,
        } => {
            if let Some(order) = order {
                config.sort_order = order;
            }
            if let Some(max_pages) = max_pages {
                config.max_pages = max_pages;
                config.incremental_pages = config.incremental_pages.min(max_pages);
            }

            let overrides = load_overrides(&overrides).unwrap_or_else(|e| {
                log::error!("Error loading overrides: {}", e);
                process::exit(1);
            });

            let pipeline = Pipeline::new(config, fetcher, CsvStore::new(&dataset), overrides)
                .unwrap_or_else(|e| {
                    log::error!("Invalid settings: {}", e);
                    process::exit(1);
                });

            let mode = RunMode::from(mode);
            log::info!("Starting {} run against {}", mode, dataset.display());

            let outcome = pipeline.run(mode).await.unwrap_or_else(|e| {
                log::error!("Run failed: {}", e);
                process::exit(1);
            });

            if let Some(latest) = latest {
                if outcome.report.records.is_empty() {
                    log::warn!("Nothing harvested, leaving {} untouched", latest.display());
                } else if let Err(e) = write_records(&latest, &outcome.report.records) {
                    log::error!("Error writing {}: {}", latest.display(), e);
                    process::exit(1);
                }
            }

            match format {
                OutputFormat::Json => serialize_json(&outcome.report),
                OutputFormat::Text => {
                    print!("{}", outcome.report);
                    print!("{}", DatasetStats::from_dataset(&outcome.dataset));
                }
            }
        }

        Commands::List { page, format } => {
            let scanner = ListingScanner::new(&config, &fetcher).unwrap_or_else(|e| {
                log::error!("Invalid base URL: {}", e);
                process::exit(1);
            });

            let entries = scanner.scan_page(page).await.unwrap_or_else(|e| {
                log::error!("{}", e);
                process::exit(1);
            });

            match format {
                OutputFormat::Json => serialize_json(&entries),
                OutputFormat::Text => {
                    if entries.is_empty() {
                        println!("No entries to display.");
                    } else {
                        for (i, entry) in entries.iter().enumerate() {
                            println!("{:>3}. {}", i + 1, entry);
                        }
                    }
                }
            }
        }

        Commands::Detail { url } => {
            log::info!("Fetching report from {}...", url);

            let html = fetcher
                .fetch(&url, &config.detail_retry)
                .await
                .unwrap_or_else(|e| {
                    log::error!("Error fetching report: {}", e);
                    process::exit(1);
                });

            match DetailExtractor::from_config(&config).extract(&html) {
                Some(body) => println!("{}", body),
                None => {
                    log::error!("No report body found at {}", url);
                    process::exit(1);
                }
            }
        }

        Commands::Date { raw } => match normalize(&raw) {
            Ok(date) => println!("{}", date),
            Err(e) => {
                log::error!("{}", e);
                process::exit(1);
            }
        },
    }
}
