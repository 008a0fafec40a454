//! Sitefleet controller - main entry point

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sitefleet_config::Config;
use sitefleet_controller::SitefleetController;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Sitefleet - fleet controller for static-site hosting nodes
#[derive(Parser, Debug)]
#[command(name = "sitefleet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "SITEFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long = "json-logs")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test {
        /// Configuration file to test
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Run the controller (default)
    Run {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Some(Commands::Test { config }) => test_config(config.or(cli.config)),
        Some(Commands::Run { config }) => run_controller(config.or(cli.config)),
        None => run_controller(cli.config),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path).context("Failed to load configuration file")?,
        None => {
            info!("No configuration specified, using defaults");
            Config::default()
        }
    };

    let result = config.validate().context("Configuration validation failed")?;
    for warning in &result.warnings {
        warn!("{}", warning.message);
    }
    Ok(config)
}

/// Test configuration file and exit
fn test_config(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path.as_ref())?;

    info!("Configuration test successful:");
    info!("  - rpc address {}", config.rpc.address);
    info!("  - state file {}", config.state.path.display());
    info!(
        "  - {} notification webhook(s)",
        config.notifications.webhooks.len()
    );

    println!(
        "sitefleet: configuration file {} test is successful",
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string())
    );
    Ok(())
}

/// Run the controller until shutdown
fn run_controller(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path.as_ref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("sitefleet")
        .build()
        .context("Failed to build runtime")?;

    runtime.block_on(async {
        let controller = SitefleetController::new(config, path).await?;
        controller.run().await
    })
}
