//! Values stored in observable containers.

use crate::array::ObservableArray;
use crate::map::ObservableMap;
use crate::node::NodeId;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A value held by an observable map or array.
///
/// Equality (`==`) follows SameValue semantics: primitives compare by value
/// (NaN equals NaN), containers and opaque values compare by identity. Use
/// [`Value::to_json`] for structural comparison.
#[derive(Clone)]
pub enum Value {
    /// No value (absent key, array hole or explicit `undefined`).
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Map(ObservableMap),
    Array(ObservableArray),
    /// A value the tree stores but does not observe into.
    Opaque(Opaque),
}

/// Discriminant of a [`Value`], used for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Map,
    Array,
    Opaque(OpaqueKind),
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Undefined => write!(f, "undefined"),
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Number => write!(f, "number"),
            ValueKind::String => write!(f, "string"),
            ValueKind::Map => write!(f, "map"),
            ValueKind::Array => write!(f, "array"),
            ValueKind::Opaque(kind) => write!(f, "{}", kind),
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Undefined => ValueKind::Undefined,
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Map(_) => ValueKind::Map,
            Value::Array(_) => ValueKind::Array,
            Value::Opaque(o) => ValueKind::Opaque(o.kind()),
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `null` or `undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// True for observable maps and arrays.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Map(_) | Value::Array(_))
    }

    pub fn as_map(&self) -> Option<&ObservableMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ObservableArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Identity of the container behind this value, if any.
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Value::Map(m) => Some(m.id()),
            Value::Array(a) => Some(a.id()),
            _ => None,
        }
    }

    /// Build fresh observable containers from a JSON document.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(ObservableArray::from_values(
                items.into_iter().map(Value::from_json),
            )),
            serde_json::Value::Object(fields) => Value::Map(ObservableMap::from_entries(
                fields.into_iter().map(|(k, v)| (k, Value::from_json(v))),
            )),
        }
    }

    /// Deep snapshot. Undefined and opaque map entries are omitted and
    /// become `null` inside arrays, matching `JSON.stringify`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Undefined | Value::Null | Value::Opaque(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Map(m) => m.to_json(),
            Value::Array(a) => a.to_json(),
        }
    }

    /// Whether a map snapshot keeps this entry.
    pub(crate) fn is_serialized_in_map(&self) -> bool {
        !matches!(self, Value::Undefined | Value::Opaque(_))
    }
}

/// Integral numbers become JSON integers so snapshots compare equal to
/// `json!` literals.
pub fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Map(m) => write!(f, "Map({}){}", m.id(), m.to_json()),
            Value::Array(a) => write!(f, "Array({}){}", a.id(), a.to_json()),
            Value::Opaque(o) => write!(f, "Opaque({})", o.kind()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<ObservableMap> for Value {
    fn from(m: ObservableMap) -> Self {
        Value::Map(m)
    }
}

impl From<ObservableArray> for Value {
    fn from(a: ObservableArray) -> Self {
        Value::Array(a)
    }
}

impl From<Opaque> for Value {
    fn from(o: Opaque) -> Self {
        Value::Opaque(o)
    }
}

/// What an opaque value stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpaqueKind {
    /// An object explicitly excluded from observation.
    Ref,
    Function,
    Symbol,
    /// A rich type owned by another system, named by its type.
    Foreign(&'static str),
}

impl fmt::Display for OpaqueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpaqueKind::Ref => write!(f, "ref"),
            OpaqueKind::Function => write!(f, "function"),
            OpaqueKind::Symbol => write!(f, "symbol"),
            OpaqueKind::Foreign(name) => write!(f, "foreign:{}", name),
        }
    }
}

/// A value stored by reference and never observed into.
#[derive(Clone)]
pub struct Opaque {
    kind: OpaqueKind,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    /// Wrap an arbitrary object, like `ref(x)`.
    pub fn reference<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            kind: OpaqueKind::Ref,
            inner: Arc::new(value),
        }
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let f: Box<dyn Fn() + Send + Sync> = Box::new(f);
        Self {
            kind: OpaqueKind::Function,
            inner: Arc::new(f),
        }
    }

    pub fn symbol(description: impl Into<String>) -> Self {
        Self {
            kind: OpaqueKind::Symbol,
            inner: Arc::new(description.into()),
        }
    }

    /// Wrap a handle owned by another system.
    pub fn foreign<T: Any + Send + Sync>(type_name: &'static str, value: T) -> Self {
        Self {
            kind: OpaqueKind::Foreign(type_name),
            inner: Arc::new(value),
        }
    }

    pub fn kind(&self) -> OpaqueKind {
        self.kind
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opaque").field("kind", &self.kind).finish()
    }
}
