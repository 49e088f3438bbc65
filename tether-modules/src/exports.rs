//! Export values observed on host modules.
//!
//! The host hands back whatever its factories produced. The core only needs
//! to look at the shape of those values: which keys an export object carries,
//! whether they are enumerable, and whether a value can be called. Objects
//! and functions compare by identity, strings and numbers by value.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// Signature of a callable export.
pub type NativeFn = dyn Fn(&[ExportValue]) -> ExportValue;

/// A callable export value.
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn new(name: &str, func: impl Fn(&[ExportValue]) -> ExportValue + 'static) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[ExportValue]) -> ExportValue {
        (self.func)(args)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

/// Any value reachable from a module's exports.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ExportValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Exports),
    Function(NativeFunction),
}

impl ExportValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, ExportValue::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExportValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExportValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExportValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Exports> {
        match self {
            ExportValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&NativeFunction> {
        match self {
            ExportValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Call the value if it is a function.
    pub fn call(&self, args: &[ExportValue]) -> Option<ExportValue> {
        self.as_function().map(|f| f.call(args))
    }
}

impl From<bool> for ExportValue {
    fn from(value: bool) -> Self {
        ExportValue::Bool(value)
    }
}

impl From<f64> for ExportValue {
    fn from(value: f64) -> Self {
        ExportValue::Number(value)
    }
}

impl From<i32> for ExportValue {
    fn from(value: i32) -> Self {
        ExportValue::Number(f64::from(value))
    }
}

impl From<&str> for ExportValue {
    fn from(value: &str) -> Self {
        ExportValue::String(value.into())
    }
}

impl From<String> for ExportValue {
    fn from(value: String) -> Self {
        ExportValue::String(value.into())
    }
}

impl From<Exports> for ExportValue {
    fn from(value: Exports) -> Self {
        ExportValue::Object(value)
    }
}

impl From<NativeFunction> for ExportValue {
    fn from(value: NativeFunction) -> Self {
        ExportValue::Function(value)
    }
}

#[derive(Debug, Clone)]
struct Property {
    value: ExportValue,
    enumerable: bool,
}

/// An export object: an ordered property map shared by reference.
#[derive(Clone)]
pub struct Exports(Rc<IndexMap<String, Property>>);

impl Exports {
    pub fn builder() -> ExportsBuilder {
        ExportsBuilder::default()
    }

    pub fn empty() -> Self {
        Self(Rc::new(IndexMap::new()))
    }

    /// Look up a property, enumerable or not.
    pub fn get(&self, key: &str) -> Option<&ExportValue> {
        self.0.get(key).map(|p| &p.value)
    }

    /// Whether `key` exists and is enumerable.
    pub fn has_enumerable(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|p| p.enumerable)
    }

    /// Enumerable keys in definition order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, p)| p.enumerable)
            .map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Exports {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// Builder for [`Exports`].
#[derive(Debug, Default)]
pub struct ExportsBuilder {
    properties: IndexMap<String, Property>,
}

impl ExportsBuilder {
    /// Add an enumerable property.
    pub fn value(mut self, key: &str, value: impl Into<ExportValue>) -> Self {
        self.properties.insert(
            key.to_string(),
            Property {
                value: value.into(),
                enumerable: true,
            },
        );
        self
    }

    /// Add a property that does not show up in enumeration.
    pub fn hidden(mut self, key: &str, value: impl Into<ExportValue>) -> Self {
        self.properties.insert(
            key.to_string(),
            Property {
                value: value.into(),
                enumerable: false,
            },
        );
        self
    }

    /// Add an enumerable function property named after its key.
    pub fn function(
        self,
        key: &str,
        func: impl Fn(&[ExportValue]) -> ExportValue + 'static,
    ) -> Self {
        let f = NativeFunction::new(key, func);
        self.value(key, f)
    }

    pub fn build(self) -> Exports {
        Exports(Rc::new(self.properties))
    }
}
