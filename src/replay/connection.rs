//! State machine for one replay connection.
//!
//! At most one socket is live at a time. Every notification is handled to
//! completion before the next one; the dispatch loop in the controller is the
//! only caller, so there is no re-entrant dispatch.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::protocol::{self, Frame};
use crate::session::{GatewayConfig, SessionId};
use crate::terminal::{TerminalSink, error_banner, info_banner};
use crate::transport::{ReplayConnector, ReplaySocket, SocketEvent};

const STARTED_BANNER: &str = "Session replay started...";
const SERVER_STOP_BANNER: &str = "Server stops the connection. Please ask admin for help.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Streaming,
    Closed,
}

pub struct ConnectionManager {
    config: GatewayConfig,
    connector: Arc<dyn ReplayConnector>,
    sink: Arc<dyn TerminalSink>,
    state: ConnectionState,
    socket: Option<ReplaySocket>,
    session: Option<SessionId>,
    torn_down: bool,
}

impl ConnectionManager {
    pub fn new(
        config: GatewayConfig,
        connector: Arc<dyn ReplayConnector>,
        sink: Arc<dyn TerminalSink>,
    ) -> Self {
        Self {
            config,
            connector,
            sink,
            state: ConnectionState::Idle,
            socket: None,
            session: None,
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    /// Next notification from the live socket. Must only be polled when
    /// [`has_socket`](Self::has_socket) is true.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        match self.socket.as_mut() {
            Some(socket) => socket.next_event().await,
            None => None,
        }
    }

    /// Open a connection for `session`, force-closing any previous one first.
    /// The old socket is fully closed before the sink is touched, so output
    /// from two connections can never interleave.
    pub async fn start(&mut self, session: SessionId) {
        self.close_socket().await;
        self.sink.reset();
        self.sink.focus();

        let url = match self.config.replay_url(&session) {
            Ok(url) => url,
            Err(err) => {
                warn!(target: "replay", session = %session, error = %err, "invalid replay url");
                self.sink.write(&error_banner(SERVER_STOP_BANNER));
                self.state = ConnectionState::Closed;
                return;
            }
        };

        debug!(target: "replay", session = %session, url = %url, "opening replay connection");
        match self.connector.connect(&url).await {
            Ok(socket) => {
                self.socket = Some(socket);
                self.session = Some(session);
                self.state = ConnectionState::Connecting;
            }
            Err(err) => {
                warn!(target: "replay", session = %session, error = %err, "replay connect failed");
                self.sink.write(&error_banner(SERVER_STOP_BANNER));
                self.state = ConnectionState::Closed;
            }
        }
    }

    pub async fn handle_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Open => {
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Streaming;
                    self.sink.write(&info_banner(STARTED_BANNER));
                    debug!(target: "replay", session = ?self.session, "replay streaming");
                }
            }
            SocketEvent::Message(payload) => self.handle_message(&payload).await,
            SocketEvent::Closed => {
                debug!(target: "replay", session = ?self.session, "server closed the connection");
                self.close_socket().await;
                self.state = ConnectionState::Closed;
            }
            SocketEvent::Failed(reason) => {
                warn!(target: "replay", session = ?self.session, reason = %reason, "connection failed");
                self.sink.write(&error_banner(SERVER_STOP_BANNER));
                self.close_socket().await;
                self.state = ConnectionState::Closed;
            }
        }
    }

    async fn handle_message(&mut self, payload: &[u8]) {
        match protocol::decode_frame(payload) {
            Ok(Frame::Ping) => {
                trace!(target: "replay", "keepalive");
            }
            Ok(Frame::Content(bytes)) => {
                self.sink.write(&normalize_chunk(bytes));
            }
            Ok(Frame::Close(bytes)) => {
                // The gateway puts its closing banner inside the close frame.
                if !bytes.is_empty() {
                    self.sink.write(&normalize_chunk(bytes));
                }
                debug!(target: "replay", session = ?self.session, "replay finished");
                self.close_socket().await;
                self.state = ConnectionState::Closed;
            }
            Err(err) => {
                // A malformed stream cannot be trusted to resynchronize.
                warn!(target: "replay", session = ?self.session, error = %err, "malformed frame");
                self.sink
                    .write(&error_banner(&format!("Malformed replay frame: {err}.")));
                self.close_socket().await;
                self.state = ConnectionState::Closed;
            }
        }
    }

    /// Forwarded to the sink in any state; independent of frame processing.
    pub fn resize(&self, cols: u16, rows: u16) {
        self.sink.resize(cols, rows);
    }

    /// Release the sink and close any live socket. Idempotent.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.close_socket().await;
        self.sink.destroy();
        self.state = ConnectionState::Closed;
        debug!(target: "replay", "torn down");
    }

    async fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close().await;
        }
        self.session = None;
    }
}

/// Rewrite a trailing `\n` to `\r\n` so the last line lands at the left
/// margin. Applied per incoming chunk, not per logical line.
fn normalize_chunk(mut bytes: Vec<u8>) -> Vec<u8> {
    if bytes.last() == Some(&b'\n') {
        bytes.pop();
        bytes.extend_from_slice(b"\r\n");
    }
    bytes
}
