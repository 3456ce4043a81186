//! sitesource - reconstructs a buildable local copy of a deployed web app
//! from its public URL.
//!
//! CLI entry point: parses a `reconstruct`/`setup` command and drives the
//! phase orchestrator (C12) to completion.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use sitesource::capture::ChromiumPageFactory;
use sitesource::config::{Cli, Commands, ReconstructArgs};
use sitesource::manifest::Mode;
use sitesource::orchestrator::{Orchestrator, OrchestratorConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("sitesource=debug,info")
    } else {
        EnvFilter::new("sitesource=info,warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match cli.command.clone() {
        Commands::Reconstruct(args) => match run_reconstruct(args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("reconstruction failed: {e}");
                ExitCode::FAILURE
            }
        },
        Commands::Setup(setup) => match run_setup(setup.force).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("setup failed: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_reconstruct(args: ReconstructArgs) -> sitesource::Result<()> {
    if args.no_cache {
        sitesource::cache::global().disable();
    }

    let mode = if args.no_capture { Mode::Direct } else { Mode::Page };
    tokio::fs::create_dir_all(&args.output).await?;

    if !args.resume {
        // Without --resume, a prior run's WAL/snapshot would otherwise be
        // silently replayed and every already-completed phase skipped.
        // Starting fresh means clearing that state up front; a missing file
        // is not an error.
        let (snapshot_path, wal_path) = sitesource::wal::state_dir_paths(&args.output);
        let _ = tokio::fs::remove_file(&snapshot_path).await;
        let _ = tokio::fs::remove_file(&wal_path).await;
    }

    let config = OrchestratorConfig {
        target_url: args.url.clone(),
        output_root: args.output.clone(),
        crawl: args.crawl_config(),
        http: args.http_config(),
        capture_options: Default::default(),
        capture_limits: Default::default(),
        mode,
    };

    let page_factory: Option<Arc<dyn sitesource::orchestrator::PageFactory>> = if mode == Mode::Page {
        let profile_dir = args.output.join(".chrome-profile");
        let factory = ChromiumPageFactory::launch(&profile_dir, args.chrome_path.as_deref()).await?;
        Some(Arc::new(factory))
    } else {
        None
    };

    let orchestrator = Orchestrator::new(config, page_factory, None).await?;
    orchestrator.run().await?;

    tracing::info!("reconstruction written to {}", args.output.display());
    Ok(())
}

async fn run_setup(force: bool) -> sitesource::Result<()> {
    eprintln!("Setting up Chromium browser...");
    let path = sitesource::browser::download_chrome(force).await?;
    eprintln!("Chromium ready at: {}", path.display());
    Ok(())
}
