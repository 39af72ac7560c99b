//! Replay lifecycle: the public entry point over the connection state machine.
//!
//! A [`ReplayController`] owns one dispatch task that serializes every input
//! (start, teardown, resize, socket notifications) onto the state machine in
//! [`connection`]. Terminal output is order-sensitive, so the loop handles
//! exactly one notification to completion at a time.

pub mod connection;

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::session::{GatewayConfig, SessionId};
use crate::terminal::TerminalSink;
use crate::transport::{ReplayConnector, SocketEvent};
use connection::ConnectionManager;

pub use connection::ConnectionState;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay controller is no longer running")]
    ControllerClosed,
}

enum ReplayCommand {
    Start {
        session: SessionId,
        ack: oneshot::Sender<()>,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    Teardown {
        ack: oneshot::Sender<()>,
    },
}

/// Entry point used by the surrounding UI. All methods are safe to call in
/// any state; teardown is idempotent and also triggered when the controller
/// is dropped (the command channel closes), so signal subscriptions never
/// outlive the instance.
pub struct ReplayController {
    commands: mpsc::UnboundedSender<ReplayCommand>,
}

impl ReplayController {
    pub fn spawn(
        config: GatewayConfig,
        connector: Arc<dyn ReplayConnector>,
        sink: Arc<dyn TerminalSink>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(config, connector, sink);
        tokio::spawn(dispatch(manager, commands_rx));
        Self {
            commands: commands_tx,
        }
    }

    /// Start (or restart) replaying `session`. Any active replay is fully
    /// closed first. On return the new connection is in `Connecting` or a
    /// later state; a connect failure has already been reported through the
    /// sink as an error line.
    pub async fn start(&self, session: SessionId) -> Result<(), ReplayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(ReplayCommand::Start {
                session,
                ack: ack_tx,
            })
            .map_err(|_| ReplayError::ControllerClosed)?;
        ack_rx.await.map_err(|_| ReplayError::ControllerClosed)
    }

    /// Forward a viewport size change; valid in any state, including after
    /// teardown (where it is silently dropped).
    pub fn resize(&self, cols: u16, rows: u16) {
        let _ = self.commands.send(ReplayCommand::Resize { cols, rows });
    }

    /// Release the terminal sink and close any active connection. Idempotent:
    /// repeated calls (or calls while idle) are no-ops.
    pub async fn teardown(&self) -> Result<(), ReplayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .commands
            .send(ReplayCommand::Teardown { ack: ack_tx })
            .is_err()
        {
            // Dispatch loop already gone: teardown has happened.
            return Ok(());
        }
        let _ = ack_rx.await;
        Ok(())
    }
}

async fn dispatch(
    mut manager: ConnectionManager,
    mut commands: mpsc::UnboundedReceiver<ReplayCommand>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(ReplayCommand::Start { session, ack }) => {
                    manager.start(session).await;
                    let _ = ack.send(());
                }
                Some(ReplayCommand::Resize { cols, rows }) => {
                    manager.resize(cols, rows);
                }
                Some(ReplayCommand::Teardown { ack }) => {
                    manager.teardown().await;
                    let _ = ack.send(());
                    break;
                }
                // Controller dropped without explicit teardown.
                None => {
                    manager.teardown().await;
                    break;
                }
            },
            event = manager.next_event(), if manager.has_socket() => match event {
                Some(event) => manager.handle_event(event).await,
                // Socket task went away without a final event.
                None => manager.handle_event(SocketEvent::Closed).await,
            },
        }
    }
    debug!(target: "replay", "dispatch loop stopped");
}
