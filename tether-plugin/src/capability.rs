//! What a stage hook can reach.
//!
//! Every hook gets a [`StageContext`] that joins two halves: the
//! [`Unscoped`] half shared by all plugins (the module registry plus a typed
//! namespace anyone may write to) and a [`Scoped`] half built for the one
//! plugin running. Scoped objects are rebuilt at each stage, and every
//! decorator registered by some other plugin is applied to them as they are
//! built.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tether_modules::{Filter, Found, ModuleRegistry, WaitHandle, WaitOptions};
use tracing::{debug, error, info};

use crate::cleanup::{CleanupRegistry, Disposer};
use crate::error::Result;
use crate::flags::{InternalFlags, PluginFlags};
use crate::lifecycle::Stage;
use crate::logger::PluginLogger;
use crate::panic_message;
use crate::registry::{PluginEntry, PluginManifest};
use crate::storage::PluginStorage;
use crate::tasks::TaskQueue;

/// A map holding at most one value per type.
#[derive(Default)]
pub struct Namespace {
    values: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value`, returning the one it replaced.
    pub fn insert<T: 'static>(&self, value: T) -> Option<Rc<T>> {
        self.values
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::new(value))
            .and_then(|old| old.downcast::<T>().ok())
    }

    pub fn get<T: 'static>(&self) -> Option<Rc<T>> {
        let value = self.values.borrow().get(&TypeId::of::<T>()).cloned()?;
        value.downcast::<T>().ok()
    }

    /// The stored value, or `init()` stored and returned.
    pub fn get_or_insert_with<T: 'static>(&self, init: impl FnOnce() -> T) -> Rc<T> {
        if let Some(value) = self.get::<T>() {
            return value;
        }
        let value = Rc::new(init());
        self.values
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::clone(&value) as Rc<dyn Any>);
        value
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.values.borrow().contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: 'static>(&self) -> Option<Rc<T>> {
        let value = self.values.borrow_mut().remove(&TypeId::of::<T>())?;
        value.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("entries", &self.len())
            .finish()
    }
}

/// State visible to every plugin.
#[derive(Debug)]
pub struct Unscoped {
    modules: ModuleRegistry,
    shared: Namespace,
}

impl Unscoped {
    pub fn new(modules: ModuleRegistry) -> Self {
        Self {
            modules,
            shared: Namespace::new(),
        }
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn shared(&self) -> &Namespace {
        &self.shared
    }
}

/// Capabilities belonging to one plugin.
#[derive(Debug)]
pub struct Scoped {
    manifest: Rc<PluginManifest>,
    logger: PluginLogger,
    storage: PluginStorage,
    cleanup: CleanupRegistry,
    extensions: Namespace,
}

impl Scoped {
    fn new(entry: &PluginEntry) -> Self {
        Self {
            manifest: Rc::clone(&entry.manifest),
            logger: PluginLogger::new(entry.id()),
            storage: entry.storage.clone(),
            cleanup: entry.cleanup.clone(),
            extensions: Namespace::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    pub fn storage(&self) -> &PluginStorage {
        &self.storage
    }

    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    /// Fields contributed by other plugins' decorators.
    pub fn extensions(&self) -> &Namespace {
        &self.extensions
    }
}

type DecorateFn = dyn Fn(&Scoped);

struct Decorator {
    id: u64,
    owner: Rc<str>,
    apply: Rc<DecorateFn>,
}

/// Decorators contributed through [`StageContext::decorate`].
#[derive(Clone, Default)]
pub(crate) struct Decorators {
    list: Rc<RefCell<Vec<Decorator>>>,
    next: Rc<Cell<u64>>,
}

impl Decorators {
    fn add(&self, owner: &str, apply: Rc<DecorateFn>) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        self.list.borrow_mut().push(Decorator {
            id,
            owner: owner.into(),
            apply,
        });
        id
    }

    fn remove(&self, id: u64) {
        self.list.borrow_mut().retain(|d| d.id != id);
    }

    /// Decorators that apply to `plugin`, with their owners: everyone's
    /// but its own.
    fn applicable(&self, plugin: &str) -> Vec<(Rc<str>, Rc<DecorateFn>)> {
        self.list
            .borrow()
            .iter()
            .filter(|d| &*d.owner != plugin)
            .map(|d| (Rc::clone(&d.owner), Rc::clone(&d.apply)))
            .collect()
    }

    /// Run every applicable decorator over `scoped`. A decorator that
    /// panics is skipped and reported against its owner.
    fn apply_to(&self, scoped: &Scoped) -> Vec<DecoratorFault> {
        let mut faults = Vec::new();
        for (owner, apply) in self.applicable(scoped.id()) {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| apply(scoped))) {
                let message = format!("decorator panicked: {}", panic_message(&*panic));
                error!(plugin = %owner, decorated = %scoped.id(), "{message}");
                faults.push(DecoratorFault { owner, message });
            }
        }
        faults
    }

    pub(crate) fn len(&self) -> usize {
        self.list.borrow().len()
    }
}

/// A decorator that failed while building another plugin's scoped object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecoratorFault {
    pub(crate) owner: Rc<str>,
    pub(crate) message: String,
}

/// Handed to each stage hook.
pub struct StageContext<'a> {
    stage: Stage,
    unscoped: &'a Unscoped,
    scoped: Scoped,
    entry: &'a PluginEntry,
    decorators: &'a Decorators,
    tasks: &'a TaskQueue,
}

impl<'a> StageContext<'a> {
    /// Build the context for `entry`, applying other plugins' decorators.
    /// Decorators that panic are returned for their owners to answer for.
    pub(crate) fn new(
        stage: Stage,
        unscoped: &'a Unscoped,
        entry: &'a PluginEntry,
        decorators: &'a Decorators,
        tasks: &'a TaskQueue,
    ) -> (Self, Vec<DecoratorFault>) {
        let scoped = Scoped::new(entry);
        let faults = decorators.apply_to(&scoped);
        let ctx = Self {
            stage,
            unscoped,
            scoped,
            entry,
            decorators,
            tasks,
        };
        (ctx, faults)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn unscoped(&self) -> &Unscoped {
        self.unscoped
    }

    pub fn scoped(&self) -> &Scoped {
        &self.scoped
    }

    pub fn modules(&self) -> &ModuleRegistry {
        self.unscoped.modules()
    }

    pub fn shared(&self) -> &Namespace {
        self.unscoped.shared()
    }

    pub fn manifest(&self) -> &PluginManifest {
        self.scoped.manifest()
    }

    pub fn logger(&self) -> &PluginLogger {
        self.scoped.logger()
    }

    pub fn storage(&self) -> &PluginStorage {
        self.scoped.storage()
    }

    pub fn flags(&self) -> PluginFlags {
        self.entry.flags.get()
    }

    pub fn internal_flags(&self) -> InternalFlags {
        self.entry.internal
    }

    /// Whether this plugin was enabled after the boot window.
    pub fn is_late(&self) -> bool {
        self.flags().contains(PluginFlags::ENABLED_LATE)
    }

    /// Run `dispose` when the plugin stops or is disabled.
    pub fn cleanup(&self, dispose: impl FnOnce() + 'static) {
        self.scoped.cleanup.add(dispose);
    }

    pub fn cleanup_with(&self, disposer: impl Into<Disposer>) {
        self.scoped.cleanup.push(disposer);
    }

    /// Contribute to the scoped object of every other plugin from now on.
    /// The decorator goes away with this plugin's cleanup.
    pub fn decorate(&self, apply: impl Fn(&Scoped) + 'static) {
        let id = self.decorators.add(self.entry.id(), Rc::new(apply));
        let decorators = self.decorators.clone();
        self.cleanup(move || decorators.remove(id));
        debug!(plugin = %self.entry.id(), "decorator registered");
    }

    /// Subscribe through the module registry; the subscription is cancelled
    /// by this plugin's cleanup.
    pub fn wait(
        &self,
        filter: Filter,
        options: WaitOptions,
        callback: impl Fn(&Found, &WaitHandle) + 'static,
    ) -> tether_modules::Result<WaitHandle> {
        let handle = self.modules().wait(filter, options, callback)?;
        self.cleanup_with(handle.clone());
        Ok(handle)
    }

    /// Queue work that completes after this hook returns. A failure is
    /// reported as an unhandled fault, not as a failure of this stage.
    pub fn spawn(&self, task: impl Future<Output = anyhow::Result<()>> + 'static) -> Result<()> {
        self.tasks.spawn(self.entry.id(), task)
    }

    /// Mark that undoing this plugin needs a host restart. Sticky.
    pub fn require_reload(&self) {
        if !self.flags().contains(PluginFlags::RELOAD_REQUIRED) {
            self.entry.insert_flags(PluginFlags::RELOAD_REQUIRED);
            info!(plugin = %self.entry.id(), "plugin requires a reload");
        }
    }
}

impl fmt::Debug for StageContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("stage", &self.stage)
            .field("plugin", &self.entry.id())
            .finish_non_exhaustive()
    }
}
