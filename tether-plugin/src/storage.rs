//! Per-plugin key/value storage.
//!
//! Plugins see a [`PluginStorage`] scoped to their own namespace. Where the
//! values end up is up to the [`StorageBackend`]; only an in-memory backend
//! ships here.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Storage settings declared in a plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Namespace to store under instead of the plugin id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Values returned for keys that were never written.
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Trait for storage backends.
pub trait StorageBackend {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError>;
    fn remove(&self, namespace: &str, key: &str) -> Result<(), StorageError>;
    fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;
}

/// Volatile backend; everything is lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    namespaces: RefCell<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .namespaces
            .borrow()
            .get(namespace)
            .and_then(|values| values.get(key))
            .cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StorageError> {
        self.namespaces
            .borrow_mut()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), StorageError> {
        if let Some(values) = self.namespaces.borrow_mut().get_mut(namespace) {
            values.remove(key);
        }
        Ok(())
    }

    fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .namespaces
            .borrow()
            .get(namespace)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// A plugin's view of the storage backend.
#[derive(Clone)]
pub struct PluginStorage {
    namespace: Rc<str>,
    defaults: Rc<Map<String, Value>>,
    backend: Rc<dyn StorageBackend>,
}

impl PluginStorage {
    pub fn new(plugin_id: &str, config: Option<&StorageConfig>, backend: Rc<dyn StorageBackend>) -> Self {
        let namespace = config
            .and_then(|c| c.namespace.as_deref())
            .unwrap_or(plugin_id);
        Self {
            namespace: namespace.into(),
            defaults: Rc::new(config.map(|c| c.defaults.clone()).unwrap_or_default()),
            backend,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Stored value for `key`, else the manifest default, else `None`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let value = match self.backend.get(&self.namespace, key)? {
            Some(value) => value,
            None => match self.defaults.get(key) {
                Some(value) => value.clone(),
                None => return Ok(None),
            },
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)?;
        self.backend.set(&self.namespace, key, value)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(&self.namespace, key)
    }

    /// Keys written to the backend; defaults are not included.
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.backend.keys(&self.namespace)
    }
}

impl fmt::Debug for PluginStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginStorage")
            .field("namespace", &self.namespace)
            .field("defaults", &self.defaults.len())
            .finish_non_exhaustive()
    }
}
