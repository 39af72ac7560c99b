//! Rendering surface for replayed output.
//!
//! The replay core only ever pushes decoded bytes at the sink; it never reads
//! the terminal buffer back. Everything behind this trait is owned by the
//! embedding surface (a real terminal here, a browser terminal in the
//! reference deployment).

use crossterm::{cursor, execute, terminal};
use std::io::{self, Write};
use tracing::{debug, warn};

/// Capability surface the replay core renders into.
pub trait TerminalSink: Send + Sync {
    /// Clear the buffer ahead of a fresh replay.
    fn reset(&self);
    /// Append raw terminal bytes (may contain escape sequences).
    fn write(&self, bytes: &[u8]);
    /// Give the surface input focus.
    fn focus(&self);
    /// Propagate a viewport size change.
    fn resize(&self, cols: u16, rows: u16);
    /// Release the surface; nothing is rendered afterwards.
    fn destroy(&self);
}

/// Green `>>> …` line the client writes for its own status messages.
pub fn info_banner(text: &str) -> Vec<u8> {
    format!("\x1b[32m>>> {text}\x1b[0m\r\n").into_bytes()
}

/// Red `>>> …` line for connection failures.
pub fn error_banner(text: &str) -> Vec<u8> {
    format!("\x1b[31m>>> {text}\x1b[0m\r\n").into_bytes()
}

/// Sink that renders into the terminal attached to stdout.
///
/// Sink failures are deliberately not propagated: a broken local terminal is
/// reported through logging, while the connection state machine keeps its own
/// lifecycle.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl TerminalSink for StdoutSink {
    fn reset(&self) {
        let mut stdout = io::stdout();
        if let Err(err) = execute!(
            stdout,
            terminal::Clear(terminal::ClearType::All),
            cursor::MoveTo(0, 0)
        ) {
            warn!(target: "terminal", error = %err, "failed to reset terminal");
        }
    }

    fn write(&self, bytes: &[u8]) {
        let mut stdout = io::stdout();
        if let Err(err) = stdout.write_all(bytes).and_then(|_| stdout.flush()) {
            warn!(target: "terminal", error = %err, "failed to write to terminal");
        }
    }

    fn focus(&self) {
        // A local terminal is focused by virtue of being in the foreground.
        debug!(target: "terminal", "focus requested");
    }

    fn resize(&self, cols: u16, rows: u16) {
        // The hosting terminal already reflowed itself; nothing to forward.
        debug!(target: "terminal", cols, rows, "viewport resized");
    }

    fn destroy(&self) {
        let mut stdout = io::stdout();
        if let Err(err) = execute!(stdout, cursor::Show) {
            warn!(target: "terminal", error = %err, "failed to restore cursor");
        }
    }
}
