//! Signal handling for graceful shutdown

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Install Ctrl+C and SIGTERM handlers.
///
/// The returned token is cancelled on the first signal. Request deadlines are
/// derived from it, so in-flight requests stop retrying once shutdown begins.
pub fn setup_signal_handlers() -> Result<CancellationToken> {
    let shutdown = CancellationToken::new();

    // Handle Ctrl+C (SIGINT)
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C signal: {}", e);
                return;
            }

            info!("Ctrl+C signal received");
            shutdown.cancel();
        });
    }

    // Handle SIGTERM (Unix only)
    #[cfg(unix)]
    {
        use signal_hook::consts::SIGTERM;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let terminated = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, terminated.clone())?;

        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                if terminated.load(Ordering::Relaxed) {
                    info!("SIGTERM signal received");
                    shutdown.cancel();
                    break;
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
                }
            }
        });
    }

    Ok(shutdown)
}
