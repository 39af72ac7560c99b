//! End-to-end replay against a real WebSocket gateway.

use axum::Router;
use axum::extract::Path;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tty_replay::replay::ReplayController;
use tty_replay::session::{GatewayConfig, SessionId};
use tty_replay::terminal::TerminalSink;
use tty_replay::transport::WebSocketConnector;

#[derive(Default)]
struct RecordingSink {
    writes: Mutex<Vec<Vec<u8>>>,
    resets: AtomicUsize,
    destroys: AtomicUsize,
}

impl RecordingSink {
    fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }
}

impl TerminalSink for RecordingSink {
    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn write(&self, bytes: &[u8]) {
        self.writes.lock().unwrap().push(bytes.to_vec());
    }

    fn focus(&self) {}

    fn resize(&self, _cols: u16, _rows: u16) {}

    fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

fn envelope(msg_type: i64, content: &[u8]) -> Vec<u8> {
    json!({ "msgType": msg_type, "content": BASE64.encode(content) })
        .to_string()
        .into_bytes()
}

async fn serve_replay(mut socket: WebSocket, session_id: String) {
    assert_eq!(session_id, "42");
    // Keepalive, two recorded chunks, then the closing banner.
    let frames = vec![
        envelope(3, b"ping"),
        envelope(0, b"$ echo hello\n"),
        envelope(1, b"hello\n"),
        envelope(2, b"\x1b[32m>>> Session replay done.\x1b[0m\n"),
    ];
    for frame in frames {
        if socket.send(Message::Binary(frame)).await.is_err() {
            return;
        }
    }
    // Leave the socket open; the client closes after the close frame.
    let _ = socket.recv().await;
}

async fn spawn_gateway() -> SocketAddr {
    let app = Router::new().route(
        "/api/sessions/:id/replay",
        get(
            |Path(session_id): Path<String>, ws: WebSocketUpgrade| async move {
                ws.on_upgrade(move |socket| serve_replay(socket, session_id))
                    .into_response()
            },
        ),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn wait_until(mut ready: impl FnMut() -> bool) {
    for _ in 0..200 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 2s");
}

#[tokio::test]
async fn streams_recorded_session_over_websocket() {
    let addr = spawn_gateway().await;
    let config = GatewayConfig::new(format!("ws://{addr}")).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let controller =
        ReplayController::spawn(config, Arc::new(WebSocketConnector), sink.clone());

    controller.start(SessionId::new("42").unwrap()).await.unwrap();
    wait_until(|| sink.writes().len() >= 4).await;

    assert_eq!(
        sink.writes(),
        vec![
            b"\x1b[32m>>> Session replay started...\x1b[0m\r\n".to_vec(),
            b"$ echo hello\r\n".to_vec(),
            b"hello\r\n".to_vec(),
            b"\x1b[32m>>> Session replay done.\x1b[0m\r\n".to_vec(),
        ]
    );
    assert_eq!(sink.resets.load(Ordering::SeqCst), 1);

    controller.teardown().await.unwrap();
    assert_eq!(sink.destroys.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_gateway_reports_single_error_line() {
    // Bind and drop a listener so the port is very likely closed.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = GatewayConfig::new(format!("ws://{addr}")).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let controller =
        ReplayController::spawn(config, Arc::new(WebSocketConnector), sink.clone());

    controller.start(SessionId::new("42").unwrap()).await.unwrap();
    assert_eq!(
        sink.writes(),
        vec![
            b"\x1b[31m>>> Server stops the connection. Please ask admin for help.\x1b[0m\r\n"
                .to_vec(),
        ]
    );

    // The failure is scoped to that connection; a later start works again.
    let gateway = spawn_gateway().await;
    let config = GatewayConfig::new(format!("ws://{gateway}")).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let controller =
        ReplayController::spawn(config, Arc::new(WebSocketConnector), sink.clone());
    controller.start(SessionId::new("42").unwrap()).await.unwrap();
    wait_until(|| sink.writes().len() >= 4).await;
    controller.teardown().await.unwrap();
}

#[tokio::test]
async fn restart_mid_stream_renders_from_the_top() {
    let addr = spawn_gateway().await;
    let config = GatewayConfig::new(format!("ws://{addr}")).unwrap();
    let sink = Arc::new(RecordingSink::default());
    let controller =
        ReplayController::spawn(config, Arc::new(WebSocketConnector), sink.clone());

    let session = SessionId::new("42").unwrap();
    controller.start(session.clone()).await.unwrap();
    controller.start(session).await.unwrap();

    // Replays are short enough that both may complete; the second one must
    // have reset the sink and replayed the stream in full.
    assert_eq!(sink.resets.load(Ordering::SeqCst), 2);
    wait_until(|| {
        let writes = sink.writes();
        writes
            .iter()
            .filter(|w| w.as_slice() == b"hello\r\n")
            .count()
            >= 1
            && writes.last().map(|w| w.ends_with(b"done.\x1b[0m\r\n")) == Some(true)
    })
    .await;

    controller.teardown().await.unwrap();
}
