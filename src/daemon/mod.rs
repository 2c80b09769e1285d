//! Relay server mode: start the HTTP/WebSocket surface and run until signalled.

use crate::config::Config;
use crate::encoder::{EncoderLauncher, ProcessLauncher};
use crate::error::{BridgeError, Result};
use crate::relay::server::{self, AppState};
use std::sync::Arc;

/// Run the relay server until SIGINT or SIGTERM.
///
/// Open sessions are torn down on shutdown, which stops their encoders.
pub async fn run_daemon(config: Config) -> Result<()> {
    config.validate()?;

    let launcher = ProcessLauncher::new(&config.encoder);
    tracing::info!(
        encoder = launcher.program(),
        target = ?config.target,
        "Starting relay"
    );
    let launcher: Arc<dyn EncoderLauncher> = Arc::new(launcher);
    let state = AppState::new(launcher, config.target.clone())?;

    server::serve(&config.server, state, shutdown_signal()).await?;

    tracing::info!("Relay stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("Error waiting for SIGINT: {}", e);
            }
            tracing::info!("Received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!("Error setting up signal handler: {}", e);
            }
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

/// Wait for SIGTERM signal (used by systemd and container runtimes).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| BridgeError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}
