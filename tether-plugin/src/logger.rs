use std::rc::Rc;

use tracing::{debug, error, info, trace, warn};

/// Logger handed to a plugin; every event carries the plugin id.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin: Rc<str>,
}

impl PluginLogger {
    pub fn new(plugin: &str) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn trace(&self, message: &str) {
        trace!(plugin = %self.plugin, "{message}");
    }

    pub fn debug(&self, message: &str) {
        debug!(plugin = %self.plugin, "{message}");
    }

    pub fn info(&self, message: &str) {
        info!(plugin = %self.plugin, "{message}");
    }

    pub fn warn(&self, message: &str) {
        warn!(plugin = %self.plugin, "{message}");
    }

    pub fn error(&self, message: &str) {
        error!(plugin = %self.plugin, "{message}");
    }
}
