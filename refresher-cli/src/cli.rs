use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "refresher",
    version,
    about = "Session-token refresh pipeline for pooled accounts"
)]
pub struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one refresh cycle over all dependent accounts
    Refresh,

    /// Delete every pool record and re-insert from the local snapshot
    Resync,

    /// Probe pool records and remove the ones that no longer authenticate
    Prune,

    /// Fetch the mailbox account listing and rebuild the local snapshot
    Accounts,

    /// Run refresh cycles periodically until interrupted
    Schedule {
        /// Hours between cycles
        #[arg(long, default_value_t = 8)]
        interval_hours: u64,

        /// Wait one interval before the first cycle instead of starting now
        #[arg(long)]
        skip_first: bool,
    },
}
