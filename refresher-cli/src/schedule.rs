//! Periodic refresh cycles with a countdown between runs.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::commands::{CommandExecutor, print_summary};
use crate::error::Result;

/// Runs refresh cycles every `interval` until Ctrl-C.
///
/// A failing cycle is logged and the schedule keeps going; only the stop
/// signal ends the loop.
pub async fn run(executor: &CommandExecutor, interval: Duration, skip_first: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stop requested, finishing up");
            stopper.cancel();
        }
    });

    let mut cycle: u64 = 0;
    let mut deferred = skip_first;
    loop {
        if deferred {
            info!(hours = interval.as_secs() / 3600, "first cycle deferred");
            deferred = false;
        } else {
            cycle += 1;
            info!(cycle, "starting scheduled refresh cycle");
            match executor.run_cycle(&cancel).await {
                Ok(summary) => print_summary(&summary),
                Err(e) => error!(cycle, error = %e, "cycle failed"),
            }
        }

        if cancel.is_cancelled() {
            return Ok(());
        }
        if !countdown(&cancel, interval).await {
            return Ok(());
        }
    }
}

/// Ticks a progress bar for `interval`. Returns `false` when cancelled.
async fn countdown(cancel: &CancellationToken, interval: Duration) -> bool {
    let total_secs = interval.as_secs().max(1);
    let bar = ProgressBar::new(total_secs);
    bar.set_style(
        ProgressStyle::with_template("next cycle in {eta} {wide_bar} {percent}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    for _ in 0..total_secs {
        tokio::select! {
            _ = cancel.cancelled() => {
                bar.abandon_with_message("stopped");
                return false;
            }
            _ = sleep(Duration::from_secs(1)) => bar.inc(1),
        }
    }
    bar.finish_and_clear();
    true
}
