//! Sender-side reconnection.
//!
//! [`ReconnectController`] is a pure state machine fed with channel lifecycle
//! events; [`run_with_reconnect`] drives a [`ChannelDriver`] with it and the
//! tokio clock.

use crate::config::ReconnectConfig;
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

/// Retry limits and timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Growth per consecutive failure; 1.0 keeps the delay fixed.
    pub multiplier: f64,
    pub max_delay: Duration,
    /// How long an attempt may take to report `connected`.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_millis(config.delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        };
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let scaled = self.delay.as_secs_f64() * multiplier.powi(exponent);
        if scaled >= self.max_delay.as_secs_f64() {
            self.max_delay.max(self.delay)
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

/// What to do after a failed or lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    RetryAfter { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    Connected,
    Backoff,
    Stopped,
    Exhausted,
}

/// Counts consecutive failures against a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    attempts: u32,
    state: ControllerState,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            state: ControllerState::Idle,
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Retries issued since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// An attempt (first or retry) is starting.
    pub fn on_connecting(&mut self) {
        if self.state != ControllerState::Stopped {
            self.state = ControllerState::Connecting;
        }
    }

    /// The channel reported `connected`; the failure count starts over.
    pub fn on_connected(&mut self) {
        self.attempts = 0;
        self.state = ControllerState::Connected;
    }

    /// The attempt failed or an established channel was lost.
    pub fn on_failure(&mut self) -> ReconnectDecision {
        if self.state == ControllerState::Stopped {
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        if self.attempts >= self.policy.max_attempts {
            self.state = ControllerState::Exhausted;
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.state = ControllerState::Backoff;
        ReconnectDecision::RetryAfter {
            attempt: self.attempts,
            delay: self.policy.delay_for(self.attempts),
        }
    }

    /// The sender no longer wants to stream.
    pub fn stop(&mut self) {
        self.state = ControllerState::Stopped;
    }
}

/// One streaming channel that can be opened repeatedly.
#[async_trait]
pub trait ChannelDriver: Send {
    /// Open the channel and wait until the far side reports `connected`.
    async fn open(&mut self) -> Result<()>;

    /// Stream until the source is exhausted (`Ok`) or the channel is lost.
    async fn pump(&mut self) -> Result<()>;

    /// Release the channel. Called after every attempt.
    async fn close(&mut self);
}

/// How [`run_with_reconnect`] ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The source ran out.
    Finished,
    /// Streaming intent was withdrawn.
    Stopped,
}

enum Step<T> {
    Done(T),
    StopRequested,
}

/// Resolves once `intent` turns false. A dropped sender keeps the last value.
async fn intent_withdrawn(intent: &mut watch::Receiver<bool>) {
    let withdrawn = intent.wait_for(|wanted| !*wanted).await.is_ok();
    if !withdrawn {
        std::future::pending::<()>().await;
    }
}

/// Stream through `driver`, reconnecting per `policy` while `intent` is true.
///
/// Returns [`BridgeError::ReconnectExhausted`] after `max_attempts` retries
/// without a successful connection.
pub async fn run_with_reconnect<D: ChannelDriver + ?Sized>(
    driver: &mut D,
    policy: ReconnectPolicy,
    mut intent: watch::Receiver<bool>,
) -> Result<RunOutcome> {
    let mut controller = ReconnectController::new(policy);

    loop {
        if !*intent.borrow() {
            controller.stop();
            return Ok(RunOutcome::Stopped);
        }
        controller.on_connecting();

        let connect_timeout = controller.policy().connect_timeout;
        let opened = tokio::select! {
            result = timeout(connect_timeout, driver.open()) => Step::Done(result),
            _ = intent_withdrawn(&mut intent) => Step::StopRequested,
        };

        let failure = match opened {
            Step::StopRequested => {
                controller.stop();
                driver.close().await;
                return Ok(RunOutcome::Stopped);
            }
            Step::Done(Err(_)) => format!("no connected status within {:?}", connect_timeout),
            Step::Done(Ok(Err(e))) => e.to_string(),
            Step::Done(Ok(Ok(()))) => {
                controller.on_connected();
                tracing::info!("Relay stream connected");

                let pumped = tokio::select! {
                    result = driver.pump() => Step::Done(result),
                    _ = intent_withdrawn(&mut intent) => Step::StopRequested,
                };
                match pumped {
                    Step::StopRequested => {
                        controller.stop();
                        driver.close().await;
                        return Ok(RunOutcome::Stopped);
                    }
                    Step::Done(Ok(())) => {
                        driver.close().await;
                        return Ok(RunOutcome::Finished);
                    }
                    Step::Done(Err(e)) => e.to_string(),
                }
            }
        };
        driver.close().await;

        match controller.on_failure() {
            ReconnectDecision::RetryAfter { attempt, delay } => {
                tracing::warn!(
                    attempt,
                    max_attempts = controller.policy().max_attempts,
                    delay = ?delay,
                    "Relay connection failed ({}), retrying",
                    failure
                );
                let waited = tokio::select! {
                    _ = sleep(delay) => Step::Done(()),
                    _ = intent_withdrawn(&mut intent) => Step::StopRequested,
                };
                if let Step::StopRequested = waited {
                    controller.stop();
                    return Ok(RunOutcome::Stopped);
                }
            }
            ReconnectDecision::GiveUp { attempts } => {
                tracing::error!(attempts, "Relay connection failed ({}), giving up", failure);
                return Err(BridgeError::ReconnectExhausted { attempts });
            }
        }
    }
}
