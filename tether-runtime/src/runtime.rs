use std::fmt;
use std::rc::Rc;

use tether_modules::{Entrypoint, Installation, ModuleRegistry, install};
use tether_plugin::{
    InternalFlags, MemoryStorage, PluginError, PluginFlags, PluginHooks, PluginManager,
    PluginManifest, StageReport, StorageBackend,
};
use tracing::{info, warn};

use crate::config::TetherConfig;
use crate::error::Result;
use crate::logging::init_logging;

/// A module registry and a plugin manager wired together from config.
pub struct Runtime {
    config: TetherConfig,
    plugins: PluginManager,
}

impl Runtime {
    pub fn new(config: TetherConfig) -> Result<Self> {
        Self::with_backend(config, Rc::new(MemoryStorage::new()))
    }

    /// Build a runtime whose plugin storage lives in `backend`. Seed values
    /// from `[plugins.storage.<namespace>]` are written first, without
    /// overwriting keys the backend already holds.
    pub fn with_backend(config: TetherConfig, backend: Rc<dyn StorageBackend>) -> Result<Self> {
        for (namespace, values) in &config.plugins.storage {
            for (key, value) in values {
                if backend.get(namespace, key)?.is_none() {
                    backend.set(namespace, key, value.clone())?;
                }
            }
        }
        let plugins = PluginManager::new(ModuleRegistry::new())
            .with_backend(backend)
            .with_policy(config.policy());
        Ok(Self { config, plugins })
    }

    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    pub fn modules(&self) -> &ModuleRegistry {
        self.plugins.modules()
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Install the configured global subscriber.
    pub fn init_logging(&self) -> Result<()> {
        Ok(init_logging(&self.config.log)?)
    }

    /// Intercept the host's module definition entrypoint.
    pub fn attach(&self, entrypoint: &Entrypoint) -> Result<Installation> {
        Ok(install(entrypoint, self.modules())?)
    }

    /// Register a plugin. A plugin turned off by flags or config is skipped
    /// and reported as `false`.
    pub fn register(
        &self,
        manifest: PluginManifest,
        hooks: impl PluginHooks + 'static,
        flags: PluginFlags,
        internal: InternalFlags,
    ) -> Result<bool> {
        match self.plugins.register(manifest, hooks, flags, internal) {
            Ok(()) => Ok(true),
            Err(PluginError::NotEnabled { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn boot(&self) -> Result<Vec<StageReport>> {
        let reports = self.plugins.boot()?;
        for report in &reports {
            if !report.failed.is_empty() {
                warn!(stage = %report.stage, failed = ?report.failed, "plugins disabled during boot");
            }
        }
        Ok(reports)
    }

    /// Stop every running plugin and drain outstanding work.
    pub fn shutdown(&self) -> StageReport {
        let report = self.plugins.stop_all();
        self.plugins.run_until_stalled();
        info!(stopped = report.succeeded.len(), "runtime shut down");
        report
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("modules", &self.modules().len())
            .field("plugins", &self.plugins)
            .finish()
    }
}
