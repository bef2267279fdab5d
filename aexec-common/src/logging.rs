//! Logging setup.
//!
//! Diagnostics go to stderr as bare messages (no timestamp, level or target)
//! so they stay greppable in CI logs next to the test binary's own output.
//! An optional JSON log file can be added for post-mortem debugging.

use crate::config::EnvParser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },

    #[error("failed to open log file {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install tracing subscriber: {0}")]
    Init(String),
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level for aexec's own crates; everything else stays at `warn`.
    pub level: String,
    /// Optional JSON log file.
    pub file: Option<PathBuf>,
}

impl LogConfig {
    /// Read `AEXEC_LOG` and `AEXEC_LOG_FILE`, falling back to `default_level`.
    ///
    /// An invalid level is not fatal here: logging must come up before
    /// configuration errors can be reported.
    pub fn from_env(default_level: &str) -> Self {
        let mut parser = EnvParser::new();
        let level = parser.get_log_level("LOG", default_level);
        let file = parser.get_optional_string("LOG_FILE").map(PathBuf::from);
        Self { level, file }
    }

    /// Filter directive string for this configuration.
    pub fn directives(&self) -> String {
        format!(
            "warn,aexec={level},aexec_common={level}",
            level = self.level
        )
    }

    fn filter(&self) -> Result<EnvFilter, LoggingError> {
        let directives = self.directives();
        EnvFilter::try_new(&directives).map_err(|e| LoggingError::Filter {
            filter: directives,
            reason: e.to_string(),
        })
    }
}

/// Keeps background log writers alive; flushes on drop.
#[must_use = "dropping the guards stops the log file writer"]
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards, LoggingError> {
    let filter = config.filter()?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_level(false)
        .with_target(false);

    let (file_layer, file_guard) = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File {
                    path: path.clone(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))?;

    Ok(LoggingGuards { _file: file_guard })
}
