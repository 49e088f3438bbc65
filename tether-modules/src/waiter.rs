//! Persistent subscriptions that fire on past and future matches.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, error};

use crate::error::Result;
use crate::filter::{Filter, Visibility};
use crate::finder::{Found, evaluate};
use crate::record::{ModuleId, ModuleRecord};
use crate::registry::{ModuleRegistry, RegistryInner};

type WaitCallback = dyn Fn(&Found, &WaitHandle);

/// How a subscription treats existing records and repeated matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Deliver records that already match before `wait` returns.
    pub cached: bool,
    /// Cancel after the first delivery.
    pub once: bool,
    pub visibility: Visibility,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            cached: true,
            once: false,
            visibility: Visibility::Initialized,
        }
    }
}

impl WaitOptions {
    /// Fire for the first match only.
    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::default()
        }
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }
}

pub(crate) struct Subscription {
    id: u64,
    filter: Filter,
    visibility: Visibility,
    once: bool,
    callback: Rc<WaitCallback>,
    active: Cell<bool>,
    seen: RefCell<HashSet<ModuleId>>,
    /// Registry tick at subscription time; records visible by then are
    /// never delivered. `None` for cached subscriptions.
    skip_through: Option<u64>,
}

impl Subscription {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Live match path: faults are logged and end this subscription only.
    pub(crate) fn offer(self: &Rc<Self>, registry: &ModuleRegistry, record: &ModuleRecord) {
        if let Err(err) = self.deliver(registry, record) {
            error!(filter = %self.filter.key(), module_id = %record.id(), "cancelling subscription: {err}");
            self.handle(registry).cancel();
        }
    }

    fn deliver(self: &Rc<Self>, registry: &ModuleRegistry, record: &ModuleRecord) -> Result<()> {
        if !self.is_active()
            || !self.visibility.admits(record.state())
            || self.seen.borrow().contains(&record.id())
        {
            return Ok(());
        }
        if let Some(mark) = self.skip_through
            && visible_since(record, self.visibility) <= mark
        {
            return Ok(());
        }
        if !evaluate(&self.filter, record)? {
            return Ok(());
        }
        // The callback may cancel or re-enter; settle our own state first.
        self.seen.borrow_mut().insert(record.id());
        let handle = self.handle(registry);
        if self.once {
            handle.cancel();
        }
        debug!(filter = %self.filter.key(), module_id = %record.id(), "subscription matched");
        let callback = Rc::clone(&self.callback);
        callback(&Found::from_record(record), &handle);
        Ok(())
    }

    fn handle(self: &Rc<Self>, registry: &ModuleRegistry) -> WaitHandle {
        WaitHandle {
            registry: Rc::downgrade(&registry.inner),
            subscription: Rc::clone(self),
        }
    }
}

/// Registry tick at which `record` became visible under `visibility`.
fn visible_since(record: &ModuleRecord, visibility: Visibility) -> u64 {
    match visibility {
        Visibility::Initialized => record.settled_at().unwrap_or(record.defined_at()),
        Visibility::Uninitialized | Visibility::Both => record.defined_at(),
    }
}

/// Cancels a subscription. Cancelling more than once is harmless.
#[derive(Clone)]
pub struct WaitHandle {
    registry: Weak<RegistryInner>,
    subscription: Rc<Subscription>,
}

impl WaitHandle {
    pub fn cancel(&self) {
        if !self.subscription.active.replace(false) {
            return;
        }
        if let Some(inner) = self.registry.upgrade() {
            ModuleRegistry { inner }.remove_subscription(self.subscription.id);
        }
        debug!(filter = %self.subscription.filter.key(), "subscription cancelled");
    }

    pub fn is_active(&self) -> bool {
        self.subscription.is_active()
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("filter", &self.subscription.filter.key())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl ModuleRegistry {
    /// Watch for modules matching `filter`.
    ///
    /// With `cached`, records that are already visible and match are
    /// delivered before this returns, in ascending id order; a predicate
    /// fault during that scan cancels the subscription and is returned.
    /// Without it, records visible right now are skipped for good. Later
    /// records are tested when they reach the requested visibility. Each
    /// module id is delivered at most once.
    pub fn wait(
        &self,
        filter: Filter,
        options: WaitOptions,
        callback: impl Fn(&Found, &WaitHandle) + 'static,
    ) -> Result<WaitHandle> {
        let id = self.inner.next_subscription.get();
        self.inner.next_subscription.set(id + 1);
        let subscription = Rc::new(Subscription {
            id,
            filter,
            visibility: options.visibility,
            once: options.once,
            callback: Rc::new(callback),
            active: Cell::new(true),
            seen: RefCell::new(HashSet::new()),
            skip_through: (!options.cached).then_some(self.inner.clock.get()),
        });
        self.inner
            .subscriptions
            .borrow_mut()
            .push(Rc::clone(&subscription));
        let handle = subscription.handle(self);
        debug!(filter = %subscription.filter.key(), cached = options.cached, "subscription registered");

        if options.cached {
            for record in &self.snapshot() {
                if !subscription.is_active() {
                    break;
                }
                if let Err(err) = subscription.deliver(self, record) {
                    handle.cancel();
                    return Err(err);
                }
            }
        }
        Ok(handle)
    }
}
