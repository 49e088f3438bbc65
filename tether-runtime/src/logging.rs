//! Tracing subscriber setup.
//!
//! Supports JSON and pretty-printed output, to stderr or to a file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, for development.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// The `[log]` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info` or `tether_plugin=debug`.
    pub level: String,
    pub format: LogFormat,
    /// Write to this file instead of stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            output_path: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
    #[error("failed to open log file: {0}")]
    FileOpen(String),
    #[error("subscriber already initialized")]
    AlreadyInitialized,
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let filter = EnvFilter::try_new(&config.level)
        .map_err(|err| LogError::InvalidFilter(err.to_string()))?;

    match config.format {
        LogFormat::Json => init_json(filter, config.output_path.as_deref()),
        LogFormat::Pretty => init_pretty(filter, config.output_path.as_deref()),
    }
}

fn open(path: &Path) -> Result<Mutex<std::fs::File>, LogError> {
    let file = std::fs::File::create(path).map_err(|err| LogError::FileOpen(err.to_string()))?;
    Ok(Mutex::new(file))
}

fn init_json(filter: EnvFilter, path: Option<&Path>) -> Result<(), LogError> {
    let registry = tracing_subscriber::registry().with(filter);
    let result = match path {
        Some(path) => registry
            .with(fmt::layer().json().with_writer(open(path)?))
            .try_init(),
        None => registry.with(fmt::layer().json()).try_init(),
    };
    result.map_err(|_| LogError::AlreadyInitialized)
}

fn init_pretty(filter: EnvFilter, path: Option<&Path>) -> Result<(), LogError> {
    let registry = tracing_subscriber::registry().with(filter);
    let result = match path {
        Some(path) => registry
            .with(fmt::layer().pretty().with_ansi(false).with_writer(open(path)?))
            .try_init(),
        None => registry.with(fmt::layer().pretty()).try_init(),
    };
    result.map_err(|_| LogError::AlreadyInitialized)
}
