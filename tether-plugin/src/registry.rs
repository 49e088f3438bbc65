use std::cell::Cell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::cleanup::CleanupRegistry;
use crate::error::{PluginError, Result};
use crate::flags::{InternalFlags, PluginFlags};
use crate::hook::PluginHooks;
use crate::storage::{PluginStorage, StorageConfig};

/// Static description of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
}

impl PluginManifest {
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            author: None,
            icon: None,
            storage: None,
        }
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_icon(mut self, icon: &str) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// Everything the orchestrator keeps for one registered plugin.
pub(crate) struct PluginEntry {
    pub(crate) manifest: Rc<PluginManifest>,
    pub(crate) hooks: Rc<dyn PluginHooks>,
    pub(crate) flags: Cell<PluginFlags>,
    pub(crate) internal: InternalFlags,
    pub(crate) cleanup: CleanupRegistry,
    pub(crate) storage: PluginStorage,
}

impl PluginEntry {
    pub(crate) fn id(&self) -> &str {
        &self.manifest.id
    }

    pub(crate) fn is_internal(&self) -> bool {
        self.internal.contains(InternalFlags::INTERNAL)
    }

    pub(crate) fn is_essential(&self) -> bool {
        self.internal.contains(InternalFlags::ESSENTIAL)
    }

    pub(crate) fn insert_flags(&self, flags: PluginFlags) {
        self.flags.set(self.flags.get() | flags);
    }
}

/// Registered plugins in registration order.
#[derive(Default)]
pub(crate) struct PluginRegistry {
    plugins: Vec<Rc<PluginEntry>>,
}

impl PluginRegistry {
    pub(crate) fn register(&mut self, entry: PluginEntry) -> Result<Rc<PluginEntry>> {
        if self.get(entry.id()).is_some() {
            return Err(PluginError::Duplicate {
                id: entry.id().to_string(),
            });
        }
        let entry = Rc::new(entry);
        self.plugins.push(Rc::clone(&entry));
        Ok(entry)
    }

    pub(crate) fn get(&self, id: &str) -> Option<Rc<PluginEntry>> {
        self.plugins.iter().find(|p| p.id() == id).cloned()
    }

    /// Internal plugins first, registration order within each group.
    pub(crate) fn stage_order(&self) -> Vec<Rc<PluginEntry>> {
        let (mut ordered, user): (Vec<_>, Vec<_>) =
            self.plugins.iter().cloned().partition(|p| p.is_internal());
        ordered.extend(user);
        ordered
    }

    pub(crate) fn all(&self) -> &[Rc<PluginEntry>] {
        &self.plugins
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.id().to_string()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.plugins.len()
    }
}
