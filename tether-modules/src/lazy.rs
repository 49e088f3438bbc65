//! Handles to values that may not exist yet.
//!
//! A [`Lazy`] can be handed out before the module it points at has been
//! defined. Each access runs the resolver until it produces a value; from
//! then on the handle is locked to that value. Nothing resolves on its own.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::error::{ModuleError, Result};
use crate::exports::{ExportValue, Exports};
use crate::filter::{Filter, Visibility};
use crate::registry::ModuleRegistry;
use crate::waiter::WaitOptions;

/// Read access to a value that is resolved on demand.
pub trait Deferred<T> {
    /// Resolve if needed and clone the value out.
    fn get(&self) -> Option<T>;

    fn is_resolved(&self) -> bool;

    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.get().map(|value| f(&value))
    }
}

type Resolver<T> = Box<dyn FnMut() -> Option<T>>;

struct LazyInner<T> {
    resolver: RefCell<Option<Resolver<T>>>,
    value: OnceCell<T>,
    cacheable: bool,
}

/// A forwarding reference with a stable identity.
pub struct Lazy<T> {
    inner: Rc<LazyInner<T>>,
}

impl<T: 'static> Lazy<T> {
    /// A handle callers may collapse into the value through a [`Binding`].
    pub fn new(resolver: impl FnMut() -> Option<T> + 'static) -> Self {
        Self::build(resolver, true)
    }

    /// A handle that always stays a handle.
    pub fn uncached(resolver: impl FnMut() -> Option<T> + 'static) -> Self {
        Self::build(resolver, false)
    }

    fn build(resolver: impl FnMut() -> Option<T> + 'static, cacheable: bool) -> Self {
        Self {
            inner: Rc::new(LazyInner {
                resolver: RefCell::new(Some(Box::new(resolver))),
                value: OnceCell::new(),
                cacheable,
            }),
        }
    }

    /// Run the resolver unless the value is already locked in.
    ///
    /// Access from inside the resolver itself yields `None`.
    pub fn resolve(&self) -> Option<&T> {
        if let Some(value) = self.inner.value.get() {
            return Some(value);
        }
        // Taken out for the duration of the call so the resolver may touch
        // this handle again.
        let mut resolver = self.inner.resolver.borrow_mut().take()?;
        match resolver() {
            Some(value) => {
                trace!(cacheable = self.inner.cacheable, "lazy handle resolved");
                Some(self.inner.value.get_or_init(|| value))
            }
            None => {
                *self.inner.resolver.borrow_mut() = Some(resolver);
                None
            }
        }
    }

    pub fn is_cacheable(&self) -> bool {
        self.inner.cacheable
    }

    pub fn ptr_eq(&self, other: &Lazy<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle over `f(value)`, resolving through this one.
    pub fn map<U: 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Lazy<U> {
        let source = self.clone();
        Lazy::build(move || source.resolve().map(&f), self.inner.cacheable)
    }
}

impl<T: Clone + 'static> Deferred<T> for Lazy<T> {
    fn get(&self) -> Option<T> {
        self.resolve().cloned()
    }

    fn is_resolved(&self) -> bool {
        self.inner.value.get().is_some()
    }

    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.resolve().map(f)
    }
}

impl<T> Clone for Lazy<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Lazy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("value", &self.inner.value.get())
            .field("cacheable", &self.inner.cacheable)
            .finish_non_exhaustive()
    }
}

impl Lazy<Exports> {
    /// Property `key` of the resolved exports.
    pub fn property(&self, key: &str) -> Option<ExportValue> {
        self.resolve()?.get(key).cloned()
    }

    /// Call the function stored under `key`.
    pub fn call_method(&self, key: &str, args: &[ExportValue]) -> Result<ExportValue> {
        let exports = self.resolve().ok_or(ModuleError::Unresolved)?;
        exports
            .get(key)
            .and_then(|value| value.call(args))
            .ok_or_else(|| ModuleError::NotCallable(key.to_string()))
    }
}

impl Lazy<ExportValue> {
    pub fn call(&self, args: &[ExportValue]) -> Result<ExportValue> {
        let value = self.resolve().ok_or(ModuleError::Unresolved)?;
        match value.as_function() {
            Some(function) => Ok(function.call(args)),
            None => Err(ModuleError::NotCallable(format!("{value:?}"))),
        }
    }
}

/// A rebindable reference: a cacheable handle is replaced by its value on
/// the first access that resolves it.
#[derive(Debug, Clone)]
pub enum Binding<T> {
    Deferred(Lazy<T>),
    Resolved(T),
}

impl<T: Clone + 'static> Binding<T> {
    pub fn get(&mut self) -> Option<&T> {
        let collapsed = match self {
            Binding::Deferred(lazy) if lazy.is_cacheable() => Some(lazy.get()),
            _ => None,
        };
        match collapsed {
            Some(Some(value)) => *self = Binding::Resolved(value),
            Some(None) => return None,
            None => {}
        }
        match self {
            Binding::Resolved(value) => Some(value),
            Binding::Deferred(lazy) => lazy.resolve(),
        }
    }

    pub fn is_collapsed(&self) -> bool {
        matches!(self, Binding::Resolved(_))
    }
}

impl<T> From<Lazy<T>> for Binding<T> {
    fn from(lazy: Lazy<T>) -> Self {
        Binding::Deferred(lazy)
    }
}

impl ModuleRegistry {
    /// A handle resolving to the exports of the first initialized match.
    ///
    /// Predicate faults are logged and count as "not found yet".
    pub fn lazy_find(&self, filter: Filter) -> Lazy<Exports> {
        let registry = self.clone();
        Lazy::new(move || match registry.find(&filter, Visibility::Initialized) {
            Ok(found) => found.and_then(|found| found.exports),
            Err(err) => {
                warn!(filter = %filter.key(), "lazy lookup failed: {err}");
                None
            }
        })
    }

    /// A handle fed by a fire-once subscription. The handle reports `None`
    /// until a matching module has been initialized.
    pub fn lazy_wait(&self, filter: Filter) -> Result<Lazy<Exports>> {
        let slot: Rc<RefCell<Option<Exports>>> = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&slot);
        self.wait(filter, WaitOptions::once(), move |found, _| {
            if let Some(exports) = &found.exports {
                *sink.borrow_mut() = Some(exports.clone());
            }
        })?;
        Ok(Lazy::new(move || slot.borrow().clone()))
    }
}
