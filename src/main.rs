use clap::{Args, Parser};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use tty_replay::logging::{self, LogConfig, LogLevel};
use tty_replay::replay::{ReplayController, ReplayError};
use tty_replay::session::{GatewayConfig, SessionError, SessionId};
use tty_replay::terminal::StdoutSink;
use tty_replay::transport::WebSocketConnector;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "tty-replay",
    about = "Replay a recorded terminal session streamed from an entry gateway",
    after_help = "Keys: r restarts the replay, q (or Ctrl-C) quits.",
    version
)]
struct Cli {
    #[arg(value_name = "SESSION", help = "Identifier of the recorded session")]
    session: String,

    #[arg(
        long,
        env = "TTY_REPLAY_GATEWAY",
        default_value = "127.0.0.1:8080",
        help = "Gateway host serving /api/sessions/<id>/replay"
    )]
    gateway: String,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "TTY_REPLAY_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "TTY_REPLAY_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("{0}")]
    Replay(#[from] ReplayError),
    #[error("logging initialization failed: {0}")]
    Logging(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Input the key listener forwards to the replay loop.
enum UiEvent {
    Restart,
    Quit,
    Resize(u16, u16),
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config()).map_err(|err| CliError::Logging(err.to_string()))?;

    let session = SessionId::new(&cli.session)?;
    let config = GatewayConfig::new(&cli.gateway)?;
    debug!(session = %session, gateway = %config.base_url(), "starting replay");

    let controller = ReplayController::spawn(
        config,
        Arc::new(WebSocketConnector),
        Arc::new(StdoutSink::new()),
    );

    let _raw = RawModeGuard::new()?;
    let mut ui_events = spawn_key_listener();

    controller.start(session.clone()).await?;

    while let Some(ui_event) = ui_events.recv().await {
        match ui_event {
            UiEvent::Restart => controller.start(session.clone()).await?,
            UiEvent::Resize(cols, rows) => controller.resize(cols, rows),
            UiEvent::Quit => break,
        }
    }

    controller.teardown().await?;
    Ok(())
}

/// Reads terminal events on a blocking thread and forwards the few the replay
/// view cares about. The thread ends when the receiver is dropped.
fn spawn_key_listener() -> mpsc::UnboundedReceiver<UiEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        loop {
            match event::poll(Duration::from_millis(250)) {
                Ok(true) => {}
                Ok(false) => {
                    if tx.is_closed() {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "input poll failed");
                    break;
                }
            }
            let forwarded = match event::read() {
                Ok(Event::Key(key)) => match classify_key(&key) {
                    Some(ui_event) => tx.send(ui_event),
                    None => Ok(()),
                },
                Ok(Event::Resize(cols, rows)) => tx.send(UiEvent::Resize(cols, rows)),
                Ok(_) => Ok(()),
                Err(err) => {
                    warn!(error = %err, "input read failed");
                    break;
                }
            };
            if forwarded.is_err() {
                break;
            }
        }
    });
    rx
}

fn classify_key(key: &KeyEvent) -> Option<UiEvent> {
    match key.code {
        KeyCode::Char('r') => Some(UiEvent::Restart),
        KeyCode::Char('q') | KeyCode::Esc => Some(UiEvent::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(UiEvent::Quit),
        _ => None,
    }
}

struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    fn new() -> Result<Self, std::io::Error> {
        enable_raw_mode()?;
        Ok(Self { active: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = disable_raw_mode();
        }
    }
}
