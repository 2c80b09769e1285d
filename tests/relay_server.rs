// tests/relay_server.rs
//! End-to-end relay tests
//!
//! Runs the real router on a loopback port and drives it with a WebSocket
//! client. The encoder is a shell script that prints the ffmpeg "output
//! opened" marker and swallows stdin, so no ingest server is needed.

#![cfg(unix)]

use castbridge::config::{EncoderConfig, TargetConfig};
use castbridge::encoder::{EncoderLauncher, ProcessLauncher};
use castbridge::relay::protocol::{ClientMessage, ServerMessage, StreamStatus};
use castbridge::relay::server::{AppState, serve_on};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Written once per test binary so no test forks while the file is open
/// for writing.
fn fake_encoder() -> &'static Path {
    static SCRIPT: OnceLock<(TempDir, PathBuf)> = OnceLock::new();
    let (_, path) = SCRIPT.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake-ffmpeg");
        std::fs::write(
            &path,
            "#!/bin/sh\necho 'Stream mapping:' >&2\nexec cat > /dev/null\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        (dir, path)
    });
    path
}

struct TestServer {
    addr: SocketAddr,
    state: AppState,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<castbridge::Result<()>>,
}

impl TestServer {
    async fn start(program: &str, static_dir: &Path) -> Self {
        let launcher: Arc<dyn EncoderLauncher> = Arc::new(ProcessLauncher::new(&EncoderConfig {
            program: program.to_string(),
            stop_grace_ms: 200,
            ..Default::default()
        }));
        let state = AppState::new(launcher, TargetConfig::default()).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let static_dir = static_dir.to_path_buf();
        let server_state = state.clone();
        let task = tokio::spawn(async move {
            serve_on(listener, &static_dir, server_state, async {
                rx.await.ok();
            })
            .await
        });

        Self {
            addr,
            state,
            shutdown: Some(tx),
            task,
        }
    }

    async fn client(&self) -> Client {
        let url = format!("ws://{}/ws", self.addr);
        let (client, _) = connect_async(url).await.expect("relay should accept");
        client
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        let result = timeout(REPLY_TIMEOUT, &mut self.task).await;
        assert!(
            matches!(result, Ok(Ok(Ok(())))),
            "server did not shut down cleanly"
        );
    }
}

async fn send(client: &mut Client, message: &ClientMessage) {
    client
        .send(Message::text(message.to_json().unwrap()))
        .await
        .unwrap();
}

async fn next_reply(client: &mut Client) -> ServerMessage {
    loop {
        let frame = timeout(REPLY_TIMEOUT, client.next())
            .await
            .expect("reply timed out")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return ServerMessage::from_json(text.as_str()).expect("reply should be valid JSON");
        }
    }
}

fn status(message: &ServerMessage) -> (StreamStatus, Option<i32>) {
    match message {
        ServerMessage::Status { status, code, .. } => (*status, *code),
        other => panic!("Expected status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_connect_stream_and_disconnect() {
    let www = tempfile::tempdir().unwrap();
    let server = TestServer::start(fake_encoder().to_str().unwrap(), www.path()).await;
    let mut client = server.client().await;

    send(&mut client, &ClientMessage::Connect { config: None }).await;
    assert_eq!(
        status(&next_reply(&mut client).await).0,
        StreamStatus::Connecting
    );
    assert_eq!(
        status(&next_reply(&mut client).await).0,
        StreamStatus::Connected
    );

    for _ in 0..3 {
        send(
            &mut client,
            &ClientMessage::Audio {
                buffer: vec![0.0, 0.25, -0.25, 1.0],
                sample_rate: Some(44100),
                channels: Some(2),
            },
        )
        .await;
    }
    client
        .send(Message::binary(
            [0.5f32, -0.5].iter().flat_map(|s| s.to_le_bytes()).collect::<Vec<u8>>(),
        ))
        .await
        .unwrap();

    send(&mut client, &ClientMessage::Disconnect).await;
    assert_eq!(
        status(&next_reply(&mut client).await),
        (StreamStatus::Disconnected, None)
    );

    client.close(None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_malformed_messages_get_errors_and_session_survives() {
    let www = tempfile::tempdir().unwrap();
    let server = TestServer::start(fake_encoder().to_str().unwrap(), www.path()).await;
    let mut client = server.client().await;

    client.send(Message::text("{not json")).await.unwrap();
    assert!(matches!(next_reply(&mut client).await, ServerMessage::Error { .. }));

    client
        .send(Message::text(r#"{"type":"rewind"}"#))
        .await
        .unwrap();
    assert!(matches!(next_reply(&mut client).await, ServerMessage::Error { .. }));

    client.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    assert!(matches!(next_reply(&mut client).await, ServerMessage::Error { .. }));

    send(&mut client, &ClientMessage::Connect { config: None }).await;
    assert_eq!(
        status(&next_reply(&mut client).await).0,
        StreamStatus::Connecting
    );

    client.close(None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_missing_encoder_reports_error() {
    let www = tempfile::tempdir().unwrap();
    let server = TestServer::start("/nonexistent/castbridge-ffmpeg", www.path()).await;
    let mut client = server.client().await;

    send(&mut client, &ClientMessage::Connect { config: None }).await;
    match next_reply(&mut client).await {
        ServerMessage::Error { message } => {
            assert!(message.contains("castbridge-ffmpeg"), "got: {}", message)
        }
        other => panic!("Expected error, got {:?}", other),
    }

    client.close(None).await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn test_connection_count_follows_clients() {
    let www = tempfile::tempdir().unwrap();
    let server = TestServer::start(fake_encoder().to_str().unwrap(), www.path()).await;

    let mut first = server.client().await;
    let mut second = server.client().await;

    // Round-trip once per client so both sessions are registered.
    for client in [&mut first, &mut second] {
        client.send(Message::text("{}")).await.unwrap();
        next_reply(client).await;
    }
    assert_eq!(server.state.connections(), 2);

    first.close(None).await.unwrap();
    second.close(None).await.unwrap();

    let deadline = tokio::time::Instant::now() + REPLY_TIMEOUT;
    while server.state.connections() != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "connections never drained"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    server.stop().await;
}

#[tokio::test]
async fn test_static_page_with_index_fallback() {
    let www = tempfile::tempdir().unwrap();
    std::fs::write(
        www.path().join("index.html"),
        "<h1>castbridge test page</h1>",
    )
    .unwrap();
    std::fs::write(www.path().join("app.js"), "console.log('ok');").unwrap();
    let server = TestServer::start(fake_encoder().to_str().unwrap(), www.path()).await;

    let http = reqwest::Client::new();
    let base = format!("http://{}", server.addr);

    let script = http.get(format!("{}/app.js", base)).send().await.unwrap();
    assert!(script.status().is_success());
    assert_eq!(script.text().await.unwrap(), "console.log('ok');");

    let page = http.get(format!("{}/stations/late-night", base)).send().await.unwrap();
    assert!(page.status().is_success());
    assert!(page.text().await.unwrap().contains("castbridge test page"));

    server.stop().await;
}
