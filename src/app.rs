//! File sender entry point.
//!
//! Orchestrates the producer side of a broadcast:
//! WAV file → sample blocks → relay WebSocket, with reconnection.

use crate::audio::wav::{BlockSource, WavBlockSource};
use crate::config::{Config, ReconnectConfig};
use crate::error::{BridgeError, Result};
use crate::relay::client::WsChannelDriver;
use crate::relay::reconnect::{ReconnectPolicy, RunOutcome, run_with_reconnect};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Everything `castbridge send` needs besides the configuration file.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub file: PathBuf,
    pub url: String,
    pub repeat: bool,
    pub block_frames: usize,
    pub overrides: crate::config::TargetOverrides,
    pub max_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

/// Reconnect policy from the `[reconnect]` section with command-line overrides.
pub fn send_policy(config: &ReconnectConfig, options: &SendOptions) -> ReconnectPolicy {
    let mut policy = ReconnectPolicy::from(config);
    if let Some(max_attempts) = options.max_attempts {
        policy.max_attempts = max_attempts;
    }
    if let Some(delay) = options.retry_delay {
        policy.delay = delay;
    }
    if let Some(timeout) = options.connect_timeout {
        policy.connect_timeout = timeout;
    }
    policy
}

/// Stream a WAV file to a relay until it ends, Ctrl+C, or retries run out.
pub async fn run_send_command(config: &Config, mut options: SendOptions) -> Result<RunOutcome> {
    let source = WavBlockSource::open(&options.file, options.block_frames)?.looping(options.repeat);
    if source.is_empty() {
        return Err(BridgeError::AudioInput {
            message: format!("{} contains no audio", options.file.display()),
        });
    }

    // The encoder must read the file's own format.
    options.overrides.sample_rate = Some(source.sample_rate());
    options.overrides.channels = Some(source.channels());
    let policy = send_policy(&config.reconnect, &options);

    tracing::info!(
        file = %options.file.display(),
        url = %options.url,
        sample_rate = source.sample_rate(),
        channels = source.channels(),
        looping = options.repeat,
        "Streaming file"
    );

    let mut driver = WsChannelDriver::new(
        options.url.clone(),
        Some(options.overrides.clone()),
        Box::new(source),
    );

    let (intent_tx, intent) = watch::channel(true);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT, stopping stream");
        }
        if intent_tx.send(false).is_err() {
            tracing::trace!("Stream already finished");
        }
    });

    let outcome = run_with_reconnect(&mut driver, policy, intent).await?;
    tracing::info!(blocks = driver.blocks_sent(), outcome = ?outcome, "Sender finished");
    Ok(outcome)
}
