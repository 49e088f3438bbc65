//! Staged plugin lifecycle for tether.
//!
//! Plugins register with a [`PluginManager`], which runs their
//! [`PluginHooks`] through `pre_init`, `init` and `start` as a barrier and
//! isolates failures to the plugin that raised them.

use std::any::Any;

pub mod capability;
pub mod cleanup;
pub mod error;
pub mod flags;
pub mod hook;
pub mod lifecycle;
pub mod logger;
pub mod manager;
pub mod policy;
pub mod registry;
pub mod storage;
mod tasks;

pub use capability::{Namespace, Scoped, StageContext, Unscoped};
pub use cleanup::{CleanupRegistry, Disposer};
pub use error::{PluginError, Result};
pub use flags::{InternalFlags, PluginFlags};
pub use hook::{HookSet, PluginHooks};
pub use lifecycle::{LifecycleEvent, LifecycleTracker, PluginState, Stage};
pub use logger::PluginLogger;
pub use manager::{PluginManager, StageReport};
pub use policy::PluginPolicy;
pub use registry::PluginManifest;
pub use storage::{MemoryStorage, PluginStorage, StorageBackend, StorageConfig, StorageError};
pub use tasks::UnhandledFault;

/// Text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
