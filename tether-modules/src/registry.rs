//! Process-wide record of every module the host has defined.
//!
//! Records live in an id-keyed arena and refer to each other only by id. The
//! registry is a cheap handle; clones share state. No borrow is held while
//! foreign code (factories, predicates, callbacks) runs, so the host may
//! re-enter through nested definitions at any point.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::error::FactoryError;
use crate::exports::Exports;
use crate::host::ModuleDefinition;
use crate::record::{ModuleId, ModuleRecord, ModuleState};
use crate::waiter::Subscription;

type IdCallback = Box<dyn FnOnce(&ModuleRecord)>;

#[derive(Default)]
struct IdCallbacks {
    pending: HashMap<ModuleId, Vec<IdCallback>>,
}

impl IdCallbacks {
    fn push(&mut self, id: ModuleId, callback: IdCallback) {
        self.pending.entry(id).or_default().push(callback);
    }

    fn take(&mut self, id: ModuleId) -> Vec<IdCallback> {
        self.pending.remove(&id).unwrap_or_default()
    }
}

#[derive(Default)]
pub(crate) struct RegistryInner {
    records: RefCell<BTreeMap<ModuleId, ModuleRecord>>,
    first_required: RefCell<IdCallbacks>,
    initialized: RefCell<IdCallbacks>,
    pub(crate) subscriptions: RefCell<Vec<Rc<Subscription>>>,
    pub(crate) next_subscription: Cell<u64>,
    /// Counts record insertions and state changes.
    pub(crate) clock: Cell<u64>,
}

/// Shared handle to the module registry.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    pub(crate) inner: Rc<RegistryInner>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ModuleId) -> Option<ModuleRecord> {
        self.inner.records.borrow().get(&id).cloned()
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.inner.records.borrow().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.borrow().is_empty()
    }

    /// Known ids in ascending order.
    pub fn ids(&self) -> Vec<ModuleId> {
        self.inner.records.borrow().keys().copied().collect()
    }

    /// Every record in ascending id order, detached from the registry.
    pub fn snapshot(&self) -> Vec<ModuleRecord> {
        self.inner.records.borrow().values().cloned().collect()
    }

    /// Adopt a module the host knew about before interception began.
    ///
    /// Returns `false` if the id is already recorded.
    pub fn observe(&self, mut record: ModuleRecord) -> bool {
        let id = record.id();
        {
            let mut records = self.inner.records.borrow_mut();
            if records.contains_key(&id) {
                return false;
            }
            record.stamp(self.tick());
            records.insert(id, record.clone());
        }
        trace!(module_id = %id, state = ?record.state(), "adopted module");
        self.settle_id_callbacks(&record);
        self.dispatch(&record);
        true
    }

    /// Fire or drop id callbacks whose event an adopted record has already
    /// passed.
    fn settle_id_callbacks(&self, record: &ModuleRecord) {
        let id = record.id();
        if record.state() != ModuleState::Uninitialized {
            let callbacks = self.inner.first_required.borrow_mut().take(id);
            for callback in callbacks {
                callback(record);
            }
        }
        match record.state() {
            ModuleState::Initialized => {
                let callbacks = self.inner.initialized.borrow_mut().take(id);
                for callback in callbacks {
                    callback(record);
                }
            }
            ModuleState::Errored => {
                self.inner.initialized.borrow_mut().take(id);
            }
            _ => {}
        }
    }

    /// Run `callback` when the host first requires `id`.
    ///
    /// Fires immediately if that already happened.
    pub fn on_module_first_required(
        &self,
        id: ModuleId,
        callback: impl FnOnce(&ModuleRecord) + 'static,
    ) {
        match self.get(id) {
            Some(record) if record.state() != ModuleState::Uninitialized => callback(&record),
            _ => self.inner.first_required.borrow_mut().push(id, Box::new(callback)),
        }
    }

    /// Run `callback` once `id` has finished initializing.
    ///
    /// Fires immediately for an initialized module and never for one that
    /// errored.
    pub fn on_module_initialized(
        &self,
        id: ModuleId,
        callback: impl FnOnce(&ModuleRecord) + 'static,
    ) {
        match self.get(id) {
            Some(record) if record.state() == ModuleState::Initialized => callback(&record),
            Some(record) if record.state() == ModuleState::Errored => {
                debug!(module_id = %id, "module errored; initialized callback dropped");
            }
            _ => self.inner.initialized.borrow_mut().push(id, Box::new(callback)),
        }
    }

    /// Create or update the record for a definition. Returns the new record
    /// when the id was not known before.
    pub(crate) fn record_definition(&self, definition: &ModuleDefinition) -> Option<ModuleRecord> {
        let mut records = self.inner.records.borrow_mut();
        match records.get_mut(&definition.id) {
            Some(existing) => {
                if existing.dependency_ids() != definition.dependency_ids.as_slice() {
                    warn!(
                        module_id = %definition.id,
                        "module redefined with different dependencies; keeping the original list"
                    );
                }
                if existing.state() == ModuleState::Uninitialized {
                    existing.redefine(definition);
                } else {
                    debug!(module_id = %definition.id, state = ?existing.state(), "ignoring redefinition");
                }
                None
            }
            None => {
                let mut record = ModuleRecord::from_definition(definition);
                record.stamp(self.tick());
                records.insert(definition.id, record.clone());
                trace!(module_id = %definition.id, "module defined");
                Some(record)
            }
        }
    }

    pub(crate) fn mark_initializing(&self, id: ModuleId) {
        let Some(record) = self.advance(id, ModuleState::Initializing, None) else {
            return;
        };
        let callbacks = self.inner.first_required.borrow_mut().take(id);
        for callback in callbacks {
            callback(&record);
        }
    }

    pub(crate) fn mark_initialized(&self, id: ModuleId, exports: Exports) {
        let Some(record) = self.advance(id, ModuleState::Initialized, Some(exports)) else {
            return;
        };
        let callbacks = self.inner.initialized.borrow_mut().take(id);
        for callback in callbacks {
            callback(&record);
        }
        self.dispatch(&record);
    }

    pub(crate) fn mark_errored(&self, id: ModuleId, error: &FactoryError) {
        warn!(module_id = %id, "module factory failed: {error}");
        if self.advance(id, ModuleState::Errored, None).is_some() {
            self.inner.initialized.borrow_mut().take(id);
        }
    }

    fn advance(
        &self,
        id: ModuleId,
        state: ModuleState,
        exports: Option<Exports>,
    ) -> Option<ModuleRecord> {
        let mut records = self.inner.records.borrow_mut();
        let record = records.get_mut(&id)?;
        if !record.set_state(state, self.tick()) {
            return None;
        }
        if let Some(exports) = exports {
            record.set_exports(exports);
        }
        trace!(module_id = %id, ?state, "module state changed");
        Some(record.clone())
    }

    fn tick(&self) -> u64 {
        let tick = self.inner.clock.get() + 1;
        self.inner.clock.set(tick);
        tick
    }

    /// Offer `record` to every live subscription that can see it.
    pub(crate) fn dispatch(&self, record: &ModuleRecord) {
        let subscriptions: Vec<Rc<Subscription>> = self
            .inner
            .subscriptions
            .borrow()
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect();
        for subscription in subscriptions {
            subscription.offer(self, record);
        }
    }

    pub(crate) fn remove_subscription(&self, id: u64) {
        self.inner
            .subscriptions
            .borrow_mut()
            .retain(|s| s.id() != id);
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.len())
            .field("subscriptions", &self.inner.subscriptions.borrow().len())
            .finish_non_exhaustive()
    }
}
