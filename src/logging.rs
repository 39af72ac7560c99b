//! Structured logging setup. Logs go to stderr by default so they never mix
//! with replayed terminal output on stdout; `--log-file` redirects them to a
//! file through a non-blocking writer.

use clap::ValueEnum;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static INIT: OnceLock<()> = OnceLock::new();
static GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// Install the global subscriber. Repeated calls are no-ops.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    if INIT.get().is_some() {
        return Ok(());
    }
    inner_init(config)?;
    INIT.set(()).ok();
    Ok(())
}

fn inner_init(config: &LogConfig) -> Result<(), InitError> {
    let env_filter = build_env_filter(config.level.to_filter());

    let (writer, guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_level(true)
        .with_target(config.level >= LogLevel::Debug)
        .with_ansi(config.file.is_none())
        .with_writer(writer)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| InitError::Configure(err.to_string()))?;

    let _ = GUARD.set(Some(guard));
    Ok(())
}

fn build_env_filter(level: LevelFilter) -> EnvFilter {
    if let Ok(filter) = std::env::var("TTY_REPLAY_LOG_FILTER") {
        return EnvFilter::new(filter);
    }
    let base = match level {
        LevelFilter::TRACE => "warn,tty_replay=trace",
        LevelFilter::DEBUG => "warn,tty_replay=debug",
        LevelFilter::INFO => "warn,tty_replay=info",
        LevelFilter::WARN => "warn",
        LevelFilter::ERROR => "error",
        LevelFilter::OFF => "off",
    };
    EnvFilter::new(base)
}
