use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::exports::Exports;
use crate::host::{Factory, ModuleDefinition};

/// Host-assigned module id. Ids follow definition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// The id `delta` positions away, if it is representable.
    pub fn offset(self, delta: i64) -> Option<ModuleId> {
        let target = i64::from(self.0).checked_add(delta)?;
        u32::try_from(target).ok().map(ModuleId)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ModuleId {
    fn from(value: u32) -> Self {
        ModuleId(value)
    }
}

/// One entry of a module's declared dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Id(ModuleId),
    /// Slot the bundler left empty (optional or stripped dependency).
    Placeholder,
}

impl Dependency {
    pub fn id(self) -> Option<ModuleId> {
        match self {
            Dependency::Id(id) => Some(id),
            Dependency::Placeholder => None,
        }
    }
}

impl From<u32> for Dependency {
    fn from(value: u32) -> Self {
        Dependency::Id(ModuleId(value))
    }
}

impl From<ModuleId> for Dependency {
    fn from(value: ModuleId) -> Self {
        Dependency::Id(value)
    }
}

/// Initialization state of a module as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    Uninitialized,
    Initializing,
    Initialized,
    Errored,
}

impl ModuleState {
    fn rank(self) -> u8 {
        match self {
            ModuleState::Uninitialized => 0,
            ModuleState::Initializing => 1,
            ModuleState::Initialized | ModuleState::Errored => 2,
        }
    }

    /// Transitions only move forward; the two end states are final.
    pub fn can_advance_to(self, next: ModuleState) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_settled(self) -> bool {
        matches!(self, ModuleState::Initialized | ModuleState::Errored)
    }
}

/// The registry's view of a single host module.
#[derive(Clone)]
pub struct ModuleRecord {
    id: ModuleId,
    dependency_ids: Rc<[Dependency]>,
    name: Option<Rc<str>>,
    state: ModuleState,
    exports: Option<Exports>,
    factory: Factory,
    defined_at: u64,
    settled_at: Option<u64>,
}

impl ModuleRecord {
    /// A record for a module that has not run yet.
    pub fn new(id: ModuleId, dependency_ids: impl Into<Rc<[Dependency]>>) -> Self {
        Self {
            id,
            dependency_ids: dependency_ids.into(),
            name: None,
            state: ModuleState::Uninitialized,
            exports: None,
            factory: Rc::new(|_| Ok(Exports::empty())),
            defined_at: 0,
            settled_at: None,
        }
    }

    pub(crate) fn from_definition(definition: &ModuleDefinition) -> Self {
        Self {
            id: definition.id,
            dependency_ids: definition.dependency_ids.as_slice().into(),
            name: definition.name.as_deref().map(Rc::from),
            state: ModuleState::Uninitialized,
            exports: None,
            factory: Rc::clone(&definition.factory),
            defined_at: 0,
            settled_at: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The same record after its factory produced `exports`.
    pub fn initialized(mut self, exports: Exports) -> Self {
        self.state = ModuleState::Initialized;
        self.exports = Some(exports);
        self
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn dependency_ids(&self) -> &[Dependency] {
        &self.dependency_ids
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn exports(&self) -> Option<&Exports> {
        self.exports.as_ref()
    }

    /// The factory as the host originally defined it.
    pub fn factory(&self) -> &Factory {
        &self.factory
    }

    /// Registry tick at which the record was recorded.
    pub(crate) fn defined_at(&self) -> u64 {
        self.defined_at
    }

    /// Registry tick at which the record reached an end state.
    pub(crate) fn settled_at(&self) -> Option<u64> {
        self.settled_at
    }

    /// Stamp a record entering the registry at `tick`.
    pub(crate) fn stamp(&mut self, tick: u64) {
        self.defined_at = tick;
        self.settled_at = self.state.is_settled().then_some(tick);
    }

    pub(crate) fn set_state(&mut self, state: ModuleState, tick: u64) -> bool {
        if !self.state.can_advance_to(state) {
            return false;
        }
        self.state = state;
        if state.is_settled() {
            self.settled_at = Some(tick);
        }
        true
    }

    pub(crate) fn set_exports(&mut self, exports: Exports) {
        self.exports = Some(exports);
    }

    pub(crate) fn redefine(&mut self, definition: &ModuleDefinition) {
        self.factory = Rc::clone(&definition.factory);
        self.name = definition.name.as_deref().map(Rc::from);
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.id)
            .field("dependency_ids", &self.dependency_ids)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}
