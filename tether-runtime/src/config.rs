//! TOML configuration.
//!
//! ```toml
//! [log]
//! level = "info,tether_plugin=debug"
//! format = "json"
//!
//! [plugins]
//! disabled = ["ads"]
//! late = ["themes"]
//!
//! [plugins.storage.notes]
//! pinned = ["inbox"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_plugin::PluginPolicy;

use crate::error::{Result, RuntimeError};
use crate::logging::LogConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TetherConfig {
    pub log: LogConfig,
    pub plugins: PluginsConfig,
}

/// The `[plugins]` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PluginsConfig {
    /// Plugins that must not run. Essential plugins ignore this.
    pub disabled: Vec<String>,
    /// Plugins held out of boot until enabled late.
    pub late: Vec<String>,
    /// Values written into a storage namespace before any plugin runs.
    pub storage: BTreeMap<String, Map<String, Value>>,
}

impl TetherConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|source| RuntimeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    pub fn policy(&self) -> PluginPolicy {
        PluginPolicy::from_lists(
            self.plugins.disabled.iter().cloned(),
            self.plugins.late.iter().cloned(),
        )
    }
}
