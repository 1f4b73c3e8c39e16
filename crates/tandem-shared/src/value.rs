//! Values stored in shared containers.

use crate::array::SharedArray;
use crate::doc::DocInner;
use crate::handle::Handle;
use crate::id::{ContainerId, ContainerKind};
use crate::map::SharedMap;
use crate::text::SharedText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Weak;

/// A primitive as stored on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum Any {
    Null,
    Bool(bool),
    Number(#[serde(with = "float_repr")] f64),
    String(String),
}

/// JSON has no NaN or infinities; those travel as strings.
mod float_repr {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Finite(f64),
        Special(String),
    }

    pub(super) fn serialize<S: Serializer>(n: &f64, s: S) -> Result<S::Ok, S::Error> {
        if n.is_nan() {
            s.serialize_str("NaN")
        } else if n.is_infinite() {
            s.serialize_str(if *n > 0.0 { "Infinity" } else { "-Infinity" })
        } else {
            s.serialize_f64(*n)
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Finite(n) => Ok(n),
            Repr::Special(s) => match s.as_str() {
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                _ => Ok(f64::NAN),
            },
        }
    }
}

/// What a map entry or list element holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum Content {
    Any(Any),
    Container(ContainerKind, ContainerId),
}

impl Content {
    pub(crate) fn container_id(&self) -> Option<&ContainerId> {
        match self {
            Content::Container(_, id) => Some(id),
            Content::Any(_) => None,
        }
    }

    pub(crate) fn to_value(&self, doc: &Weak<DocInner>) -> SharedValue {
        match self {
            Content::Any(Any::Null) => SharedValue::Null,
            Content::Any(Any::Bool(b)) => SharedValue::Bool(*b),
            Content::Any(Any::Number(n)) => SharedValue::Number(*n),
            Content::Any(Any::String(s)) => SharedValue::String(s.clone()),
            Content::Container(kind, id) => {
                let handle = Handle::attached(id.clone(), *kind, doc.clone());
                match kind {
                    ContainerKind::Map => SharedValue::Map(SharedMap::from_handle(handle)),
                    ContainerKind::Array => SharedValue::Array(SharedArray::from_handle(handle)),
                    ContainerKind::Text => SharedValue::Text(SharedText::from_handle(handle)),
                }
            }
        }
    }
}

/// A value read from or written to a shared container.
///
/// Containers compare equal when they are the same container (same id);
/// primitives compare by value, with NaN equal to NaN.
#[derive(Clone)]
pub enum SharedValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Map(SharedMap),
    Array(SharedArray),
    Text(SharedText),
}

impl SharedValue {
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            SharedValue::Map(_) | SharedValue::Array(_) | SharedValue::Text(_)
        )
    }

    pub fn container_id(&self) -> Option<&ContainerId> {
        match self {
            SharedValue::Map(m) => Some(m.id()),
            SharedValue::Array(a) => Some(a.id()),
            SharedValue::Text(t) => Some(t.id()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&SharedMap> {
        match self {
            SharedValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&SharedArray> {
        match self {
            SharedValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SharedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Build detached containers from a JSON document.
    pub fn from_json(json: serde_json::Value) -> SharedValue {
        match json {
            serde_json::Value::Null => SharedValue::Null,
            serde_json::Value::Bool(b) => SharedValue::Bool(b),
            serde_json::Value::Number(n) => SharedValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => SharedValue::String(s),
            serde_json::Value::Array(items) => SharedValue::Array(SharedArray::from_values(
                items.into_iter().map(SharedValue::from_json).collect(),
            )),
            serde_json::Value::Object(fields) => SharedValue::Map(SharedMap::from_entries(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, SharedValue::from_json(v)))
                    .collect(),
            )),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SharedValue::Null => serde_json::Value::Null,
            SharedValue::Bool(b) => serde_json::Value::Bool(*b),
            SharedValue::Number(n) => number_to_json(*n),
            SharedValue::String(s) => serde_json::Value::String(s.clone()),
            SharedValue::Map(m) => m.to_json(),
            SharedValue::Array(a) => a.to_json(),
            SharedValue::Text(t) => serde_json::Value::String(t.to_string()),
        }
    }

    /// Wire form of a primitive; `None` for containers.
    pub(crate) fn to_any(&self) -> Option<Any> {
        match self {
            SharedValue::Null => Some(Any::Null),
            SharedValue::Bool(b) => Some(Any::Bool(*b)),
            SharedValue::Number(n) => Some(Any::Number(*n)),
            SharedValue::String(s) => Some(Any::String(s.clone())),
            _ => None,
        }
    }

    pub(crate) fn handle(&self) -> Option<&Handle> {
        match self {
            SharedValue::Map(m) => Some(m.handle()),
            SharedValue::Array(a) => Some(a.handle()),
            SharedValue::Text(t) => Some(t.handle()),
            _ => None,
        }
    }
}

/// Integral numbers become JSON integers so snapshots compare equal to
/// `json!` literals.
pub(crate) fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SharedValue::Null, SharedValue::Null) => true,
            (SharedValue::Bool(a), SharedValue::Bool(b)) => a == b,
            (SharedValue::Number(a), SharedValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (SharedValue::String(a), SharedValue::String(b)) => a == b,
            (SharedValue::Map(a), SharedValue::Map(b)) => a == b,
            (SharedValue::Array(a), SharedValue::Array(b)) => a == b,
            (SharedValue::Text(a), SharedValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SharedValue::Null => write!(f, "null"),
            SharedValue::Bool(b) => write!(f, "{}", b),
            SharedValue::Number(n) => write!(f, "{}", n),
            SharedValue::String(s) => write!(f, "{:?}", s),
            SharedValue::Map(m) => write!(f, "{:?}", m),
            SharedValue::Array(a) => write!(f, "{:?}", a),
            SharedValue::Text(t) => write!(f, "{:?}", t),
        }
    }
}

impl From<&str> for SharedValue {
    fn from(s: &str) -> Self {
        SharedValue::String(s.to_string())
    }
}

impl From<String> for SharedValue {
    fn from(s: String) -> Self {
        SharedValue::String(s)
    }
}

impl From<bool> for SharedValue {
    fn from(b: bool) -> Self {
        SharedValue::Bool(b)
    }
}

impl From<f64> for SharedValue {
    fn from(n: f64) -> Self {
        SharedValue::Number(n)
    }
}

impl From<i32> for SharedValue {
    fn from(n: i32) -> Self {
        SharedValue::Number(n as f64)
    }
}

impl From<i64> for SharedValue {
    fn from(n: i64) -> Self {
        SharedValue::Number(n as f64)
    }
}

impl From<SharedMap> for SharedValue {
    fn from(m: SharedMap) -> Self {
        SharedValue::Map(m)
    }
}

impl From<SharedArray> for SharedValue {
    fn from(a: SharedArray) -> Self {
        SharedValue::Array(a)
    }
}

impl From<SharedText> for SharedValue {
    fn from(t: SharedText) -> Self {
        SharedValue::Text(t)
    }
}
