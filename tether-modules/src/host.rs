//! The boundary with the host's module system.
//!
//! A host exposes one definition entrypoint. [`Entrypoint`] is the slot that
//! holds it; the interceptor swaps in a forwarding function and tags the slot
//! with its owner. [`BundleHost`] is a small define/require module system
//! built on that slot, used to drive the core without a real host attached.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{FactoryError, ModuleError};
use crate::exports::Exports;
use crate::record::{Dependency, ModuleId};

/// Module body. Runs at most once, when the host first requires the module.
pub type Factory = Rc<dyn Fn(&dyn ModuleScope) -> Result<Exports, FactoryError>>;

/// What a running factory may do with the host.
pub trait ModuleScope {
    fn require(&self, id: ModuleId) -> Result<Exports, FactoryError>;
    fn define(&self, definition: ModuleDefinition);
}

/// One call of the host's definition entrypoint.
#[derive(Clone)]
pub struct ModuleDefinition {
    pub id: ModuleId,
    pub dependency_ids: Vec<Dependency>,
    pub name: Option<String>,
    pub factory: Factory,
}

impl ModuleDefinition {
    pub fn new(
        id: impl Into<ModuleId>,
        dependency_ids: Vec<Dependency>,
        factory: impl Fn(&dyn ModuleScope) -> Result<Exports, FactoryError> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            dependency_ids,
            name: None,
            factory: Rc::new(factory),
        }
    }

    /// Definition whose factory returns `exports` without touching the host.
    pub fn with_exports(id: impl Into<ModuleId>, dependency_ids: Vec<Dependency>, exports: Exports) -> Self {
        Self::new(id, dependency_ids, move |_| Ok(exports.clone()))
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("id", &self.id)
            .field("dependency_ids", &self.dependency_ids)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub type DefineFn = Rc<dyn Fn(ModuleDefinition)>;

/// The host's replaceable module-definition function.
pub struct Entrypoint {
    define: RefCell<DefineFn>,
    owner: RefCell<Option<String>>,
}

impl Entrypoint {
    pub fn new(define: impl Fn(ModuleDefinition) + 'static) -> Self {
        Self {
            define: RefCell::new(Rc::new(define)),
            owner: RefCell::new(None),
        }
    }

    /// Invoke whatever function currently occupies the slot.
    pub fn define(&self, definition: ModuleDefinition) {
        let define = Rc::clone(&self.define.borrow());
        define(definition);
    }

    /// Who replaced the original function, if anyone did.
    pub fn owner(&self) -> Option<String> {
        self.owner.borrow().clone()
    }

    /// Replace the slot with `wrap(original)`. Fails if any owner is present.
    pub fn replace(
        &self,
        owner: &str,
        wrap: impl FnOnce(DefineFn) -> DefineFn,
    ) -> Result<(), ModuleError> {
        if let Some(current) = self.owner() {
            return Err(ModuleError::EntrypointTaken { owner: current });
        }
        let original = Rc::clone(&self.define.borrow());
        *self.define.borrow_mut() = wrap(original);
        *self.owner.borrow_mut() = Some(owner.to_string());
        Ok(())
    }
}

impl fmt::Debug for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entrypoint")
            .field("owner", &self.owner.borrow())
            .finish_non_exhaustive()
    }
}

struct HostModule {
    factory: Factory,
    exports: Option<Exports>,
    failure: Option<FactoryError>,
    running: bool,
}

struct BundleHostInner {
    entrypoint: Rc<Entrypoint>,
    modules: RefCell<BTreeMap<ModuleId, HostModule>>,
}

impl BundleHostInner {
    fn store(&self, definition: ModuleDefinition) {
        let mut modules = self.modules.borrow_mut();
        match modules.get_mut(&definition.id) {
            Some(module) if module.exports.is_none() && !module.running => {
                module.factory = definition.factory;
            }
            Some(_) => {}
            None => {
                modules.insert(
                    definition.id,
                    HostModule {
                        factory: definition.factory,
                        exports: None,
                        failure: None,
                        running: false,
                    },
                );
            }
        }
    }
}

/// Minimal define/require host. Modules initialize lazily on first require.
#[derive(Clone)]
pub struct BundleHost {
    inner: Rc<BundleHostInner>,
}

impl BundleHost {
    pub fn new() -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<BundleHostInner>| {
            let weak = weak.clone();
            BundleHostInner {
                entrypoint: Rc::new(Entrypoint::new(move |definition| {
                    if let Some(inner) = weak.upgrade() {
                        inner.store(definition);
                    }
                })),
                modules: RefCell::new(BTreeMap::new()),
            }
        });
        Self { inner }
    }

    pub fn entrypoint(&self) -> Rc<Entrypoint> {
        Rc::clone(&self.inner.entrypoint)
    }

    pub fn is_defined(&self, id: ModuleId) -> bool {
        self.inner.modules.borrow().contains_key(&id)
    }

    /// Exports of `id`, running its factory on first use.
    ///
    /// A require cycle fails instead of handing out partial exports.
    pub fn require(&self, id: ModuleId) -> Result<Exports, FactoryError> {
        let factory = {
            let mut modules = self.inner.modules.borrow_mut();
            let module = modules
                .get_mut(&id)
                .ok_or_else(|| FactoryError::new(format!("module {id} is not defined")))?;
            if let Some(exports) = &module.exports {
                return Ok(exports.clone());
            }
            if let Some(failure) = &module.failure {
                return Err(failure.clone());
            }
            if module.running {
                return Err(FactoryError::new(format!("module {id} required while initializing")));
            }
            module.running = true;
            Rc::clone(&module.factory)
        };

        let result = factory(self);

        let mut modules = self.inner.modules.borrow_mut();
        if let Some(module) = modules.get_mut(&id) {
            module.running = false;
            match &result {
                Ok(exports) => module.exports = Some(exports.clone()),
                Err(err) => module.failure = Some(err.clone()),
            }
        }
        result
    }
}

impl Default for BundleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleScope for BundleHost {
    fn require(&self, id: ModuleId) -> Result<Exports, FactoryError> {
        BundleHost::require(self, id)
    }

    fn define(&self, definition: ModuleDefinition) {
        self.inner.entrypoint.define(definition);
    }
}

impl fmt::Debug for BundleHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleHost")
            .field("modules", &self.inner.modules.borrow().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::exports::ExportValue;

    #[test]
    fn test_require_runs_factory_once() {
        let host = BundleHost::new();
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        host.define(ModuleDefinition::new(1, vec![], move |_| {
            counter.set(counter.get() + 1);
            Ok(Exports::builder().value("ok", true).build())
        }));

        let first = host.require(ModuleId(1)).unwrap();
        let second = host.require(ModuleId(1)).unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_factories_can_require_dependencies() {
        let host = BundleHost::new();
        host.define(ModuleDefinition::with_exports(
            1,
            vec![],
            Exports::builder().value("base", 2).build(),
        ));
        host.define(ModuleDefinition::new(2, vec![Dependency::from(1)], |scope| {
            let base = scope.require(ModuleId(1))?;
            let n = base.get("base").and_then(ExportValue::as_f64).unwrap_or(0.0);
            Ok(Exports::builder().value("derived", n * 10.0).build())
        }));

        let exports = host.require(ModuleId(2)).unwrap();
        assert_eq!(exports.get("derived"), Some(&ExportValue::Number(20.0)));
    }

    #[test]
    fn test_require_cycle_fails() {
        let host = BundleHost::new();
        host.define(ModuleDefinition::new(1, vec![], |scope| scope.require(ModuleId(1))));
        let err = host.require(ModuleId(1)).unwrap_err();
        assert!(err.message.contains("while initializing"));
        // The failure sticks.
        assert!(host.require(ModuleId(1)).is_err());
    }

    #[test]
    fn test_unknown_module_fails() {
        let host = BundleHost::new();
        assert!(host.require(ModuleId(99)).is_err());
        assert!(!host.is_defined(ModuleId(99)));
    }

    #[test]
    fn test_entrypoint_replace_records_owner() {
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let entrypoint = Entrypoint::new(move |_| counter.set(counter.get() + 1));
        assert_eq!(entrypoint.owner(), None);

        entrypoint
            .replace("first", |original| {
                Rc::new(move |definition| {
                    original(definition);
                })
            })
            .unwrap();
        assert_eq!(entrypoint.owner().as_deref(), Some("first"));

        let err = entrypoint.replace("second", |original| original).unwrap_err();
        assert!(matches!(err, ModuleError::EntrypointTaken { owner } if owner == "first"));

        entrypoint.define(ModuleDefinition::with_exports(1, vec![], Exports::empty()));
        assert_eq!(seen.get(), 1);
    }
}
