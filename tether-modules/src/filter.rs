//! Structural predicates over module records.
//!
//! A [`Filter`] never touches the registry. It only reads the record it is
//! handed, so it can be evaluated as often as a scan needs. Every filter has
//! a `key` that identifies it in log lines and errors.

use std::fmt;
use std::rc::Rc;

use crate::error::PredicateFault;
use crate::exports::ExportValue;
use crate::pattern::DependencyPattern;
use crate::record::{ModuleRecord, ModuleState};

/// Which initialization states a lookup can see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Initialized,
    /// Modules the host has not finished running, including those still
    /// initializing.
    Uninitialized,
    Both,
}

impl Visibility {
    /// Errored modules are never visible.
    pub fn admits(self, state: ModuleState) -> bool {
        match (self, state) {
            (_, ModuleState::Errored) => false,
            (Visibility::Initialized, state) => state == ModuleState::Initialized,
            (Visibility::Uninitialized, state) => state != ModuleState::Initialized,
            (Visibility::Both, _) => true,
        }
    }
}

type CustomFn = dyn Fn(&ModuleRecord) -> Result<bool, PredicateFault>;

enum FilterKind {
    Name(String),
    Props(Vec<String>),
    ExportName(String),
    Dependencies(DependencyPattern),
    State(Visibility),
    Custom(Rc<CustomFn>),
    When(Visibility, Filter),
    And(Vec<Filter>),
    Preferred(Vec<Filter>),
}

#[derive(Clone)]
pub struct Filter {
    key: Rc<str>,
    kind: Rc<FilterKind>,
}

impl Filter {
    fn new(key: String, kind: FilterKind) -> Self {
        Self {
            key: key.into(),
            kind: Rc::new(kind),
        }
    }

    /// The module was defined with this verbose name.
    pub fn by_name(name: &str) -> Self {
        Self::new(format!("name:{name}"), FilterKind::Name(name.to_string()))
    }

    /// Every key is present and enumerable on the module's exports.
    pub fn by_props<I, S>(props: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let props: Vec<String> = props.into_iter().map(Into::into).collect();
        Self::new(format!("props:{}", props.join(",")), FilterKind::Props(props))
    }

    /// The exports carry a `name` or `displayName` string equal to `name`.
    pub fn by_export_name(name: &str) -> Self {
        Self::new(
            format!("export-name:{name}"),
            FilterKind::ExportName(name.to_string()),
        )
    }

    pub fn by_dependencies(pattern: DependencyPattern) -> Self {
        Self::new(
            format!("deps:{}", pattern.describe()),
            FilterKind::Dependencies(pattern),
        )
    }

    /// Matches on initialization state alone.
    pub fn in_state(visibility: Visibility) -> Self {
        Self::new(format!("state:{visibility:?}"), FilterKind::State(visibility))
    }

    /// A caller-supplied predicate. It must not have side effects.
    pub fn custom(
        key: &str,
        predicate: impl Fn(&ModuleRecord) -> Result<bool, PredicateFault> + 'static,
    ) -> Self {
        Self::new(format!("custom:{key}"), FilterKind::Custom(Rc::new(predicate)))
    }

    /// First filter in the list that finds anything wins.
    pub fn preferred(filters: Vec<Filter>) -> Self {
        let key = filters.iter().map(|f| f.key()).collect::<Vec<_>>().join(" | ");
        Self::new(format!("preferred({key})"), FilterKind::Preferred(filters))
    }

    /// Restrict this filter to records in the given state view.
    pub fn when(self, visibility: Visibility) -> Self {
        let key = format!("{}@{visibility:?}", self.key);
        Self::new(key, FilterKind::When(visibility, self))
    }

    /// Both filters must match. The right side is not evaluated when the
    /// left one fails.
    pub fn and(self, other: Filter) -> Self {
        let key = format!("{} & {}", self.key, other.key);
        let mut clauses = Vec::new();
        for filter in [self, other] {
            match &*filter.kind {
                FilterKind::And(inner) => clauses.extend(inner.iter().cloned()),
                _ => clauses.push(filter),
            }
        }
        Self::new(key, FilterKind::And(clauses))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Filters in the order a lookup should try them.
    pub fn priorities(&self) -> &[Filter] {
        match &*self.kind {
            FilterKind::Preferred(filters) => filters,
            _ => std::slice::from_ref(self),
        }
    }

    pub fn matches(&self, record: &ModuleRecord) -> Result<bool, PredicateFault> {
        match &*self.kind {
            FilterKind::Name(name) => Ok(record.name() == Some(name.as_str())),
            FilterKind::Props(props) => Ok(record
                .exports()
                .is_some_and(|exports| props.iter().all(|p| exports.has_enumerable(p)))),
            FilterKind::ExportName(name) => Ok(record.exports().is_some_and(|exports| {
                ["name", "displayName"].iter().any(|key| {
                    exports.get(key).and_then(ExportValue::as_str) == Some(name.as_str())
                })
            })),
            FilterKind::Dependencies(pattern) => {
                Ok(pattern.matches(record.id(), record.dependency_ids()))
            }
            FilterKind::State(visibility) => Ok(visibility.admits(record.state())),
            FilterKind::Custom(predicate) => predicate(record),
            FilterKind::When(visibility, inner) => {
                if !visibility.admits(record.state()) {
                    return Ok(false);
                }
                inner.matches(record)
            }
            FilterKind::And(clauses) => {
                for clause in clauses {
                    if !clause.matches(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            FilterKind::Preferred(filters) => {
                for filter in filters {
                    if filter.matches(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Filter").field(&self.key).finish()
    }
}
