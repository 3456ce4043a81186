//! CLI surface (C-CLI, SPEC_FULL §2): a single `reconstruct` command over
//! `clap`, mirroring the teacher's `Config`/`Commands`/`ScanConfig` split —
//! global flags on the top-level `Cli`, per-run flags on `ReconstructArgs`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::crawl::CrawlConfig;
use crate::http::HttpConfig;

/// Reconstructs a buildable local copy of a deployed web app from its
/// public URL.
#[derive(Parser, Debug, Clone)]
#[command(name = "sitesource")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Reconstruct a site from its public URL.
    Reconstruct(ReconstructArgs),
    /// Download and set up a managed Chromium browser.
    Setup(SetupArgs),
}

/// Configuration for the `setup` command.
#[derive(Parser, Debug, Clone)]
pub struct SetupArgs {
    /// Force re-download even if Chromium is already installed.
    #[arg(long)]
    pub force: bool,
}

/// Configuration for the `reconstruct` command.
#[derive(Parser, Debug, Clone)]
pub struct ReconstructArgs {
    /// Target URL to reconstruct.
    pub url: String,

    /// Output directory for the reconstructed project.
    #[arg(short, long, default_value = "./reconstructed")]
    pub output: PathBuf,

    /// Maximum number of pages to crawl.
    #[arg(long, default_value = "200")]
    pub max_pages: usize,

    /// Maximum crawl depth from the seed URL.
    #[arg(long, default_value = "5")]
    pub max_depth: u32,

    /// Number of concurrent crawl workers / batched source-map extractions.
    #[arg(short, long, default_value = "5")]
    pub concurrency: usize,

    /// Retries per crawled page before it is marked failed.
    #[arg(long, default_value = "1")]
    pub page_retries: u32,

    /// Disable the content-addressed fetch/extraction cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Resume a previous run from its WAL/snapshot in `--output`.
    #[arg(long)]
    pub resume: bool,

    /// Run bundle discovery and extraction directly against the seed URL,
    /// without a live browser crawl/capture pass (`Mode::Direct`).
    #[arg(long)]
    pub no_capture: bool,

    /// Request timeout in seconds.
    #[arg(long, default_value = "30")]
    pub timeout: u64,

    /// Maximum retries for a single transient HTTP failure.
    #[arg(long, default_value = "2")]
    pub max_retries: u32,

    /// Custom User-Agent string.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Path to a Chrome/Chromium executable (overrides auto-detection).
    #[arg(long)]
    pub chrome_path: Option<PathBuf>,
}

impl ReconstructArgs {
    pub fn http_config(&self) -> HttpConfig {
        let mut config = HttpConfig::default();
        config.timeout_secs = self.timeout;
        config.max_retries = self.max_retries;
        if let Some(ref ua) = self.user_agent {
            config.user_agent = ua.clone();
        }
        config
    }

    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            max_pages: self.max_pages,
            max_depth: self.max_depth,
            concurrency: self.concurrency,
            page_retries: self.page_retries,
        }
    }
}
