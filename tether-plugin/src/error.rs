use crate::lifecycle::PluginState;
use crate::storage::StorageError;

/// Errors produced by the plugin orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin `{id}` is not enabled")]
    NotEnabled { id: String },

    #[error("plugin `{id}` is already registered")]
    Duplicate { id: String },

    #[error("unknown plugin `{id}`")]
    Unknown { id: String },

    #[error("plugin `{id}` is essential and cannot be disabled")]
    Essential { id: String },

    #[error("plugin `{id}` cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: PluginState,
        to: PluginState,
    },

    #[error("plugins have already been booted")]
    AlreadyBooted,

    #[error("failed to schedule deferred work: {0}")]
    Spawn(#[from] futures::task::SpawnError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, PluginError>;
