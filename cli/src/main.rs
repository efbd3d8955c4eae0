//! CLI for Aperture
//!
//! Operator tool over a configured profile store:
//! - import: store profile artifacts from files
//! - get / find / merge: read profiles back
//! - services, gc: store maintenance

use anyhow::{Context as _, Result};
use aperture_shared::utils::parse_duration;
use aperture_store::{Context, StorageError, StoreConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "aperture")]
#[command(about = "Aperture - continuous profiling store", long_about = None)]
#[command(version)]
struct Cli {
    /// Store configuration file (TOML)
    #[arg(short, long, global = true, env = "APERTURE_CONFIG")]
    config: Option<PathBuf>,

    /// Abort the command after this long (e.g. "30s", "5m"); 0 waits forever
    #[arg(long, global = true, default_value = "0")]
    timeout: String,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print store metrics in Prometheus text format to stderr when done
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store profile artifacts read from files
    Import(commands::import::ImportArgs),

    /// Show stored profiles by id, or write their merge to a file
    Get(commands::get::GetArgs),

    /// List profiles matching a query
    Find(commands::find::FindArgs),

    /// Merge the profiles matching a query into one artifact
    Merge(commands::merge::MergeArgs),

    /// List services with stored profiles
    Services,

    /// Reclaim expired records in the embedded stores
    Gc,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        output::error(&describe(&e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let timeout = parse_duration(&cli.timeout).context("Failed to parse timeout")?;

    let config = StoreConfig::load(cli.config.as_deref())?;
    let backends = config.open().await?;

    let ctx = if timeout.is_zero() {
        Context::background()
    } else {
        Context::background().with_timeout(timeout)
    };
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = match cli.command {
        Commands::Import(args) => commands::import::run(&ctx, &backends, args).await,
        Commands::Get(args) => commands::get::run(&ctx, &backends, args).await,
        Commands::Find(args) => commands::find::run(&ctx, &backends, args).await,
        Commands::Merge(args) => commands::merge::run(&ctx, &backends, args).await,
        Commands::Services => commands::services::run(&ctx, &backends).await,
        Commands::Gc => commands::gc::run(&backends),
    };

    backends.shutdown().await;
    if cli.metrics {
        eprint!("{}", aperture_store::metrics::encode_metrics());
    }
    result
}

/// User-facing message for a failed command
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<StorageError>() {
        Some(StorageError::NotFound) => "No profiles found".to_string(),
        Some(e) if e.is_canceled() => format!("Interrupted: {}", e),
        _ => format!("{:#}", err),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
