//! Wiring for tether: configuration, logging, and a [`Runtime`] that
//! attaches the module registry to a host and boots plugins.

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{PluginsConfig, TetherConfig};
pub use error::{Result, RuntimeError};
pub use logging::{LogConfig, LogError, LogFormat, init_logging};
pub use runtime::Runtime;
