//! HTTP surface of the bridge: relay WebSocket, `/api` proxy and static page.

use crate::config::{ServerConfig, TargetConfig};
use crate::defaults;
use crate::encoder::EncoderLauncher;
use crate::error::{BridgeError, Result};
use crate::relay::protocol::ServerMessage;
use crate::relay::proxy::{self, ApiProxy};
use crate::relay::session::{InboundFrame, Session};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

/// Frames buffered between the socket reader and the session loop.
const INBOUND_QUEUE: usize = 64;

/// Shared state for all relay connections.
#[derive(Clone)]
pub struct AppState {
    launcher: Arc<dyn EncoderLauncher>,
    defaults: TargetConfig,
    proxy: ApiProxy,
    connections: Arc<AtomicUsize>,
    next_session: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(launcher: Arc<dyn EncoderLauncher>, defaults: TargetConfig) -> Result<Self> {
        let proxy = ApiProxy::new(&defaults)?;
        Ok(Self {
            launcher,
            defaults,
            proxy,
            connections: Arc::new(AtomicUsize::new(0)),
            next_session: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn proxy(&self) -> &ApiProxy {
        &self.proxy
    }

    /// Relay connections currently open.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Build the router: relay channel, `/api` proxy, static files with
/// `index.html` fallback.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    let index = ServeFile::new(static_dir.join("index.html"));
    let static_files = ServeDir::new(static_dir).fallback(index);

    Router::new()
        .route(defaults::RELAY_PATH, get(relay_upgrade))
        .route("/api/{*path}", any(proxy::forward))
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `config.listen` and serve until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| BridgeError::Server {
            message: format!("Failed to bind {}: {}", config.listen, e),
        })?;
    serve_on(listener, &config.static_dir, state, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_on<F>(
    listener: TcpListener,
    static_dir: &Path,
    state: AppState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(
        addr = ?local,
        static_dir = %static_dir.display(),
        upstream = %state.proxy().upstream(),
        "Relay server listening"
    );

    let app = router(state, static_dir);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::Server {
            message: format!("Server error: {}", e),
        })
}

async fn relay_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_connection(socket, state))
}

/// Bridge one WebSocket to a [`Session`] until either side goes away.
async fn relay_connection(socket: WebSocket, state: AppState) {
    let session_id = state.next_session.fetch_add(1, Ordering::Relaxed);
    let open = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
    tracing::info!(
        session = session_id,
        connections = open,
        "Relay client connected"
    );

    let (sender, mut receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let session = Session::new(
        session_id,
        Arc::clone(&state.launcher),
        state.defaults.clone(),
        outbound_tx,
    );
    let session_task = tokio::spawn(
        session
            .run(inbound_rx)
            .instrument(tracing::info_span!("session", id = session_id)),
    );
    let writer = tokio::spawn(write_outbound(sender, outbound_rx, session_id));

    while let Some(message) = receiver.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => InboundFrame::Text(text.as_str().to_string()),
            Ok(Message::Binary(bytes)) => InboundFrame::Binary(bytes.to_vec()),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(session = session_id, error = %e, "Relay socket error");
                break;
            }
        };
        if inbound_tx.send(frame).await.is_err() {
            break;
        }
    }

    // Closing the inbound queue ends the session, which stops its encoder.
    drop(inbound_tx);
    if let Err(e) = session_task.await {
        tracing::error!(session = session_id, error = %e, "Session task failed");
    }
    writer.abort();

    let open = state.connections.fetch_sub(1, Ordering::Relaxed) - 1;
    tracing::info!(
        session = session_id,
        connections = open,
        "Relay client disconnected"
    );
}

async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
    session_id: u64,
) {
    while let Some(message) = outbound.recv().await {
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "Failed to encode message");
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }
    if let Err(e) = sender.close().await {
        tracing::debug!(session = session_id, error = %e, "Relay socket close failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::session::tests::MockLauncher;

    #[tokio::test]
    async fn test_state_counts_start_at_zero() {
        let launcher: Arc<dyn EncoderLauncher> = Arc::new(MockLauncher::default());
        let state = AppState::new(launcher, TargetConfig::default()).unwrap();
        assert_eq!(state.connections(), 0);
        assert_eq!(state.proxy().upstream().as_str(), "http://localhost:8000/");
    }

    #[tokio::test]
    async fn test_state_rejects_unusable_target_host() {
        let launcher: Arc<dyn EncoderLauncher> = Arc::new(MockLauncher::default());
        let target = TargetConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(AppState::new(launcher, target).is_err());
    }
}
