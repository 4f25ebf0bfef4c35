//! Logging initialisation
//!
//! The library only emits `tracing` events; hosts that have no subscriber of
//! their own can install one with [`init_logging`].
//!
//! The level is taken from `LoggingConfig::filter`, else `RUST_LOG`, else
//! `info`. With `log_dir` set, events are also written to a daily-rotated
//! file through a non-blocking writer whose guard must be kept alive.

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

fn default_file_prefix() -> String {
    "shadow-guard.log".to_string()
}

/// Subscriber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; falls back to `RUST_LOG`, then `info`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Directory for rotated log files (console only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    /// File name prefix inside `log_dir`
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
            log_dir: None,
            file_prefix: default_file_prefix(),
        }
    }
}

impl LoggingConfig {
    /// Use explicit filter directives
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Toggle JSON output
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Also write to rotated files under `dir`
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Set the log file prefix
    pub fn with_file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }
}

/// Keeps the file writer flushing; dropping it flushes pending events
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Build the subscriber without installing it
pub fn build_subscriber(
    config: &LoggingConfig,
) -> anyhow::Result<(impl tracing::Subscriber + Send + Sync, LoggingGuard)> {
    let filter = match &config.filter {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {:?}", directives))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let console_layer = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;

            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .build(dir)
                .with_context(|| format!("failed to open log file in {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let layer = if config.json {
                fmt::layer().json().with_writer(writer).with_ansi(false).boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer);

    Ok((subscriber, LoggingGuard { _file_guard: file_guard }))
}

/// Install the global subscriber
pub fn init_logging(config: LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let (subscriber, guard) = build_subscriber(&config)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("a global tracing subscriber is already installed")?;

    match &config.log_dir {
        Some(dir) => tracing::info!("Logging initialized - writing to {}", dir.display()),
        None => tracing::debug!("Logging initialized"),
    }
    Ok(guard)
}
