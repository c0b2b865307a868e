//! Termination signal handling

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::thread;
use tracing::info;
use vm_broker::CancellationToken;

/// Fire `shutdown` on the first SIGINT or SIGTERM
pub fn cancel_on_termination(shutdown: CancellationToken) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handler")?;

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, shutting down", sig);
                shutdown.cancel();
            }
        })
        .context("Failed to spawn signal thread")?;

    Ok(())
}
