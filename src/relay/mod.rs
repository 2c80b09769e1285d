//! Browser-facing relay: WebSocket protocol, sessions and the sender side.

pub mod client;
pub mod protocol;
pub mod proxy;
pub mod reconnect;
pub mod server;
pub mod session;

pub use client::WsChannelDriver;
pub use protocol::{ClientMessage, ServerMessage, StreamStatus};
pub use reconnect::{ChannelDriver, ReconnectPolicy, RunOutcome, run_with_reconnect};
pub use server::{AppState, router, serve, serve_on};
pub use session::{ConnectionStatus, InboundFrame, Session};
