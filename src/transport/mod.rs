//! Socket seam between the connection manager and the network.
//!
//! A [`ReplayConnector`] opens exactly one receive-only socket per call and
//! hands back a [`ReplaySocket`]: an event stream plus a close handle. The
//! production implementation pumps a tokio-tungstenite WebSocket from a
//! spawned task; tests substitute scripted connectors.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
}

/// Asynchronous notification from a live socket. Events are delivered in
/// arrival order and the stream ends once the socket is closed or failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The connection finished opening.
    Open,
    /// One raw message payload.
    Message(Vec<u8>),
    /// The peer closed the connection without a protocol-level close frame.
    Closed,
    /// The connection failed; carries a human-readable reason.
    Failed(String),
}

/// One live connection: an ordered event stream plus a close handle.
pub struct ReplaySocket {
    events: mpsc::UnboundedReceiver<SocketEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ReplaySocket {
    pub fn new(
        events: mpsc::UnboundedReceiver<SocketEvent>,
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            events,
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// Next socket notification; `None` once the socket task is gone.
    pub async fn next_event(&mut self) -> Option<SocketEvent> {
        self.events.recv().await
    }

    /// Close the socket and wait until its task has fully stopped. Events
    /// still buffered in the stream are discarded.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ReplaySocket {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens one replay socket per call.
#[async_trait]
pub trait ReplayConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<ReplaySocket, TransportError>;
}

/// Production connector backed by tokio-tungstenite.
#[derive(Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl ReplayConnector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<ReplaySocket, TransportError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(target: "transport", url = %url, "websocket connected");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        // connect_async resolves once the handshake completed, which is the
        // transport "open" notification.
        let _ = events_tx.send(SocketEvent::Open);
        let task = tokio::spawn(run_socket(stream, events_tx, shutdown_rx));
        Ok(ReplaySocket::new(events_rx, shutdown_tx, task))
    }
}

async fn run_socket(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut sender, mut receiver) = stream.split();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Binary(payload))) => {
                    if events.send(SocketEvent::Message(payload)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if events.send(SocketEvent::Message(text.into_bytes())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(SocketEvent::Closed);
                    break;
                }
                Some(Ok(other)) => {
                    // Websocket-level ping/pong is answered by tungstenite.
                    trace!(target: "transport", message = ?other, "ignoring control message");
                }
                Some(Err(err)) => {
                    let _ = events.send(SocketEvent::Failed(err.to_string()));
                    break;
                }
            }
        }
    }
    debug!(target: "transport", "socket task stopped");
}
