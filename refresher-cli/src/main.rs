mod cli;
mod commands;
mod config;
mod driver;
mod error;
mod schedule;
mod store;

use std::process;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands};
use crate::commands::CommandExecutor;
use crate::config::AppConfig;
use crate::error::Result;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    let config = AppConfig::load(args.config.as_deref())?;
    let executor = CommandExecutor::new(config);

    match args.command {
        Commands::Refresh => {
            let cancel = CancellationToken::new();
            let stopper = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("stop requested, finishing current wave");
                    stopper.cancel();
                }
            });
            executor.refresh(&cancel).await?;
        }
        Commands::Resync => executor.resync().await?,
        Commands::Prune => executor.prune().await?,
        Commands::Accounts => executor.accounts().await?,
        Commands::Schedule {
            interval_hours,
            skip_first,
        } => {
            let interval = Duration::from_secs(interval_hours.max(1) * 3600);
            schedule::run(&executor, interval, skip_first).await?;
        }
    }
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
}
