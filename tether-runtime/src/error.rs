use std::path::PathBuf;

use tether_modules::ModuleError;
use tether_plugin::{PluginError, StorageError};

use crate::logging::LogError;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error(transparent)]
    Logging(#[from] LogError),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
    #[error("failed to seed plugin storage: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
