//! WebSocket producer that streams sample blocks to a relay server.

use crate::audio::wav::BlockSource;
use crate::config::TargetOverrides;
use crate::error::{BridgeError, Result};
use crate::relay::protocol::{ClientMessage, ServerMessage, StreamStatus};
use crate::relay::reconnect::ChannelDriver;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the relay told us while we were streaming.
enum Reply {
    /// Nothing that affects the stream
    Ignored,
    /// The stream ended on the far side
    Lost(String),
}

enum PumpInput {
    BlockDue,
    Incoming(Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>),
}

/// [`ChannelDriver`] over a WebSocket connection to a relay server.
///
/// Each `open` sends `connect` with the configured overrides and waits for the
/// relay to report `connected`. `pump` then sends blocks at the source's own
/// rate, so a file plays in real time.
pub struct WsChannelDriver {
    url: String,
    overrides: Option<TargetOverrides>,
    source: Box<dyn BlockSource>,
    socket: Option<Socket>,
    blocks_sent: u64,
}

impl WsChannelDriver {
    pub fn new(
        url: impl Into<String>,
        overrides: Option<TargetOverrides>,
        source: Box<dyn BlockSource>,
    ) -> Self {
        Self {
            url: url.into(),
            overrides,
            source,
            socket: None,
            blocks_sent: 0,
        }
    }

    /// Blocks sent over all connections so far.
    pub fn blocks_sent(&self) -> u64 {
        self.blocks_sent
    }

    fn socket(&mut self) -> Result<&mut Socket> {
        self.socket.as_mut().ok_or_else(|| BridgeError::ChannelLost {
            reason: "not connected".to_string(),
        })
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = message.to_json().map_err(|e| BridgeError::Protocol {
            message: format!("Failed to encode message: {}", e),
        })?;
        self.socket()?
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| BridgeError::ChannelLost {
                reason: e.to_string(),
            })
    }
}

/// Interpret one frame from the relay.
fn interpret(message: &Message) -> Result<Option<ServerMessage>> {
    match message {
        Message::Text(text) => ServerMessage::from_json(text.as_str())
            .map(Some)
            .map_err(|e| BridgeError::Protocol {
                message: format!("Unexpected relay message: {}", e),
            }),
        Message::Close(frame) => Err(BridgeError::ChannelLost {
            reason: frame
                .as_ref()
                .map(|f| f.reason.as_str().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "relay closed the connection".to_string()),
        }),
        _ => Ok(None),
    }
}

fn on_streaming_reply(message: ServerMessage) -> Reply {
    match message {
        ServerMessage::Status {
            status: StreamStatus::Disconnected,
            code,
            message,
        } => Reply::Lost(
            message.unwrap_or_else(|| format!("encoder stopped (code {:?})", code)),
        ),
        ServerMessage::Status { status, .. } => {
            tracing::debug!(status = ?status, "Relay status");
            Reply::Ignored
        }
        ServerMessage::Error { message } => {
            tracing::warn!("Relay reported: {}", message);
            Reply::Ignored
        }
    }
}

#[async_trait]
impl ChannelDriver for WsChannelDriver {
    async fn open(&mut self) -> Result<()> {
        tracing::info!(url = %self.url, "Connecting to relay");
        let (socket, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| BridgeError::ChannelConnection {
                    message: format!("{}: {}", self.url, e),
                })?;
        self.socket = Some(socket);

        self.send(&ClientMessage::Connect {
            config: self.overrides.clone(),
        })
        .await?;

        let mut encoder_started = false;
        loop {
            let Some(frame) = self.socket()?.next().await else {
                return Err(BridgeError::ChannelLost {
                    reason: "relay closed before the stream connected".to_string(),
                });
            };
            let frame = frame.map_err(|e| BridgeError::ChannelLost {
                reason: e.to_string(),
            })?;
            match interpret(&frame)? {
                Some(ServerMessage::Status {
                    status: StreamStatus::Connected,
                    ..
                }) => return Ok(()),
                Some(ServerMessage::Status {
                    status: StreamStatus::Disconnected,
                    code,
                    message,
                }) => {
                    return Err(BridgeError::ChannelConnection {
                        message: message
                            .unwrap_or_else(|| format!("encoder exited (code {:?})", code)),
                    });
                }
                Some(ServerMessage::Error { message }) if !encoder_started => {
                    // No encoder was started for this connect
                    return Err(BridgeError::ChannelConnection { message });
                }
                Some(ServerMessage::Error { message }) => {
                    // The encoder may still connect or exit afterwards
                    tracing::warn!("Relay reported: {}", message);
                }
                Some(ServerMessage::Status {
                    status: StreamStatus::Connecting,
                    ..
                }) => encoder_started = true,
                None => {}
            }
        }
    }

    async fn pump(&mut self) -> Result<()> {
        let mut due = Instant::now();
        loop {
            let Some(block) = self.source.next_block() else {
                tracing::info!(blocks = self.blocks_sent, "Source finished");
                return self.send(&ClientMessage::Disconnect).await;
            };

            let duration = Duration::from_secs_f64(
                block.frames() as f64 / f64::from(block.sample_rate.max(1)),
            );
            self.send(&ClientMessage::Audio {
                buffer: block.samples,
                sample_rate: Some(block.sample_rate),
                channels: Some(block.channels),
            })
            .await?;
            self.blocks_sent += 1;

            // Real-time pacing; keep reading replies while waiting.
            due += duration;
            loop {
                let socket = self.socket()?;
                let input = tokio::select! {
                    _ = sleep_until(due) => PumpInput::BlockDue,
                    frame = socket.next() => PumpInput::Incoming(frame),
                };
                match input {
                    PumpInput::BlockDue => break,
                    PumpInput::Incoming(None) => {
                        return Err(BridgeError::ChannelLost {
                            reason: "relay connection ended".to_string(),
                        });
                    }
                    PumpInput::Incoming(Some(Err(e))) => {
                        return Err(BridgeError::ChannelLost {
                            reason: e.to_string(),
                        });
                    }
                    PumpInput::Incoming(Some(Ok(frame))) => {
                        let Some(message) = interpret(&frame)? else {
                            continue;
                        };
                        if let Reply::Lost(reason) = on_streaming_reply(message) {
                            return Err(BridgeError::ChannelLost { reason });
                        }
                    }
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut socket) = self.socket.take()
            && let Err(e) = socket.close(None).await
        {
            tracing::debug!(error = %e, "Relay socket close failed");
        }
    }
}
