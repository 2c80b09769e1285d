//! Per-connection session: routes one broadcaster's audio to one encoder.
//!
//! A session owns at most one [`EncoderHandle`]. All inbound frames and all
//! encoder events are processed by a single loop in arrival order, so the
//! session state needs no locking.

use crate::audio::convert::{self, f32le_to_samples};
use crate::config::{TargetConfig, TargetOverrides};
use crate::encoder::{EncoderEvent, EncoderHandle, EncoderLauncher, FeedOutcome};
use crate::relay::protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One frame received on the relay channel.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// JSON control or audio message
    Text(String),
    /// Interleaved `f32` little-endian samples
    Binary(Vec<u8>),
}

/// Authoritative connection state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected(Option<i32>),
    Error(String),
}

struct ActiveEncoder {
    handle: EncoderHandle,
    target: TargetConfig,
    format_warned: bool,
}

enum SessionInput {
    Frame(Option<InboundFrame>),
    Encoder(Option<EncoderEvent>),
}

/// State for one relay connection.
pub struct Session {
    id: u64,
    launcher: Arc<dyn EncoderLauncher>,
    defaults: TargetConfig,
    active: Option<ActiveEncoder>,
    status: ConnectionStatus,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl Session {
    /// Create a session that starts encoders with `launcher`, merging client
    /// overrides onto `defaults`, and reports to `outbound`.
    pub fn new(
        id: u64,
        launcher: Arc<dyn EncoderLauncher>,
        defaults: TargetConfig,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            id,
            launcher,
            defaults,
            active: None,
            status: ConnectionStatus::Idle,
            outbound,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Whether an encoder is currently bound to this session.
    pub fn has_encoder(&self) -> bool {
        self.active.is_some()
    }

    /// Target of the active encoder, if any.
    pub fn active_target(&self) -> Option<&TargetConfig> {
        self.active.as_ref().map(|a| &a.target)
    }

    /// Process frames and encoder events until the channel closes, then stop
    /// the encoder.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundFrame>) {
        loop {
            let input = tokio::select! {
                frame = inbound.recv() => SessionInput::Frame(frame),
                event = self.next_encoder_event() => SessionInput::Encoder(event),
            };

            match input {
                SessionInput::Frame(Some(frame)) => self.handle_frame(frame),
                SessionInput::Frame(None) => break,
                SessionInput::Encoder(Some(event)) => self.on_encoder_event(event),
                SessionInput::Encoder(None) => {
                    // Handle finished without us seeing its exit
                    self.active = None;
                }
            }
        }
        self.close();
    }

    /// Next event of the active encoder. Pending forever without one.
    pub async fn next_encoder_event(&mut self) -> Option<EncoderEvent> {
        match self.active.as_mut() {
            Some(active) => active.handle.next_event().await,
            None => std::future::pending().await,
        }
    }

    pub fn handle_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Text(text) => self.handle_text(&text),
            InboundFrame::Binary(bytes) => match f32le_to_samples(&bytes) {
                Some(samples) => self.route_audio(samples, None, None),
                None => {
                    tracing::warn!(
                        session = self.id,
                        len = bytes.len(),
                        "Binary frame is not a whole number of f32 samples"
                    );
                    self.send(ServerMessage::error(
                        "Binary audio frames must contain little-endian f32 samples",
                    ));
                }
            },
        }
    }

    pub fn handle_text(&mut self, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(message),
            Err(e) => {
                tracing::warn!(session = self.id, error = %e, "Malformed relay message");
                self.send(ServerMessage::error(format!(
                    "Failed to process message: {}",
                    e
                )));
            }
        }
    }

    pub fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Connect { config } => self.begin_routing(config.as_ref()),
            ClientMessage::Audio {
                buffer,
                sample_rate,
                channels,
            } => self.route_audio(buffer, sample_rate, channels),
            ClientMessage::Disconnect => self.end_routing(),
        }
    }

    /// Start a fresh encoder for the merged target, replacing any active one.
    pub fn begin_routing(&mut self, overrides: Option<&TargetOverrides>) {
        let target = match overrides {
            Some(overrides) => self.defaults.with_overrides(overrides),
            None => Ok(self.defaults.clone()),
        };
        let target = match target {
            Ok(target) => target,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        if let Some(mut previous) = self.active.take() {
            tracing::info!(
                session = self.id,
                handle = previous.handle.id(),
                "Replacing active encoder"
            );
            previous.handle.stop();
        }

        match self.launcher.launch(&target) {
            Ok(handle) => {
                tracing::info!(
                    session = self.id,
                    handle = handle.id(),
                    pid = ?handle.pid(),
                    mountpoint = %target.mountpoint,
                    "Routing audio to ingest server"
                );
                self.active = Some(ActiveEncoder {
                    handle,
                    target,
                    format_warned: false,
                });
                self.status = ConnectionStatus::Connecting;
                self.send(ServerMessage::connecting());
            }
            Err(e) => {
                tracing::error!(session = self.id, error = %e, "Failed to start encoder");
                self.fail(e.to_string());
            }
        }
    }

    /// Convert one block and hand it to the active encoder.
    ///
    /// Silently ignored without an encoder. No resampling happens: a block at
    /// a different rate than the encoder was started with is fed as-is.
    pub fn route_audio(
        &mut self,
        samples: Vec<f32>,
        sample_rate: Option<u32>,
        channels: Option<u16>,
    ) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let rate_differs = sample_rate.is_some_and(|r| r != active.target.sample_rate);
        let channels_differ = channels.is_some_and(|c| c != active.target.channels);
        if (rate_differs || channels_differ) && !active.format_warned {
            active.format_warned = true;
            tracing::warn!(
                session = self.id,
                handle = active.handle.id(),
                block_rate = ?sample_rate,
                block_channels = ?channels,
                encoder_rate = active.target.sample_rate,
                encoder_channels = active.target.channels,
                "Audio format differs from encoder input, feeding unchanged"
            );
        }

        match active.handle.feed(convert::to_s16le(&samples)) {
            FeedOutcome::Queued => {}
            FeedOutcome::Backpressure => tracing::trace!(
                session = self.id,
                dropped = active.handle.dropped_blocks(),
                "Encoder input full, dropped block"
            ),
            FeedOutcome::Closed => {
                tracing::trace!(session = self.id, "Encoder input closed, dropped block")
            }
        }
    }

    /// Stop the active encoder and report `disconnected` once.
    ///
    /// Without an active encoder this is a no-op.
    pub fn end_routing(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        tracing::info!(
            session = self.id,
            handle = active.handle.id(),
            "Stopping encoder"
        );
        active.handle.stop();
        self.status = ConnectionStatus::Disconnected(None);
        self.send(ServerMessage::disconnected(None));
    }

    /// Apply one event of the active encoder.
    pub fn on_encoder_event(&mut self, event: EncoderEvent) {
        match event {
            EncoderEvent::Connected => {
                self.status = ConnectionStatus::Connected;
                self.send(ServerMessage::connected());
            }
            EncoderEvent::Failure(message) => {
                self.status = ConnectionStatus::Error(message.clone());
                self.send(ServerMessage::error(message));
            }
            EncoderEvent::Exited(code) => {
                self.active = None;
                self.status = ConnectionStatus::Disconnected(code);
                self.send(ServerMessage::disconnected(code));
            }
        }
    }

    /// Tear down on channel close. Nothing is sent.
    pub fn close(&mut self) {
        if let Some(mut active) = self.active.take() {
            tracing::info!(
                session = self.id,
                handle = active.handle.id(),
                "Channel closed, stopping encoder"
            );
            active.handle.stop();
        }
        self.status = ConnectionStatus::Idle;
    }

    fn fail(&mut self, message: String) {
        self.status = ConnectionStatus::Error(message.clone());
        self.send(ServerMessage::error(message));
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            tracing::debug!(session = self.id, "Relay channel gone, message dropped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
