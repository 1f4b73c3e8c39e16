//! Value conversion between the two trees.
//!
//! - [`to_shared`] turns observable values into shared values. Containers
//!   become fresh detached shared containers that are bound to their source
//!   before they are returned.
//! - [`to_plain`] deep-copies shared values into new, unbound observable
//!   values.
//! - [`values_equal`] and [`map_slot_equal`] compare across the two models,
//!   which disagree on `undefined`.
//! - [`IdentityCache`] remembers which observable container is bound to
//!   which shared container.

use crate::engine::{bind_pair, BindContext};
use crate::error::{Result, Unsupported};
use crate::resolve::NodePair;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tandem_observable::{NodeId, ObservableArray, ObservableMap, Opaque, Value};
use tandem_shared::{ContainerId, SharedArray, SharedMap, SharedText, SharedValue};
use tracing::warn;

/// Type name carried by placeholders for shared text.
pub const TEXT_PLACEHOLDER: &str = "SharedText";

/// Non-owning association from observable containers to the shared
/// containers they are bound to. Only ids are stored, so neither side is
/// kept alive by the cache. Each side appears in at most one pair.
#[derive(Debug, Default)]
pub struct IdentityCache {
    inner: Mutex<Pairs>,
}

#[derive(Debug, Default)]
struct Pairs {
    by_node: HashMap<NodeId, ContainerId>,
    by_container: HashMap<ContainerId, NodeId>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `observable` with `shared`, dropping any earlier pair either
    /// side was part of.
    pub fn remember(&self, observable: NodeId, shared: &ContainerId) {
        let mut inner = self.inner.lock();
        if let Some(previous) = inner.by_node.insert(observable, shared.clone()) {
            inner.by_container.remove(&previous);
        }
        if let Some(previous) = inner.by_container.insert(shared.clone(), observable) {
            if previous != observable {
                inner.by_node.remove(&previous);
            }
        }
    }

    pub fn is_bound_together(&self, observable: NodeId, shared: &ContainerId) -> bool {
        self.inner.lock().by_node.get(&observable) == Some(shared)
    }

    pub fn forget(&self, observable: NodeId) -> Option<ContainerId> {
        let mut inner = self.inner.lock();
        let shared = inner.by_node.remove(&observable)?;
        inner.by_container.remove(&shared);
        Some(shared)
    }

    /// Drop the pair holding `shared`, returning its observable side.
    pub fn forget_container(&self, shared: &ContainerId) -> Option<NodeId> {
        let mut inner = self.inner.lock();
        let node = inner.by_container.remove(shared)?;
        inner.by_node.remove(&node);
        Some(node)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.by_node.clear();
        inner.by_container.clear();
    }
}

/// Convert an observable value for storage in the shared tree.
///
/// `Undefined` becomes `Null`; callers writing map keys remove the key
/// instead. Containers are copied into new detached shared containers and
/// bound to their source through `ctx`. Opaque values are rejected.
pub fn to_shared(ctx: &Arc<BindContext>, value: &Value) -> Result<SharedValue> {
    match value {
        Value::Undefined | Value::Null => Ok(SharedValue::Null),
        Value::Bool(b) => Ok(SharedValue::Bool(*b)),
        Value::Number(n) => Ok(SharedValue::Number(*n)),
        Value::String(s) => Ok(SharedValue::String(s.clone())),
        Value::Map(observable) => {
            let shared = SharedMap::new();
            bind_pair(
                ctx,
                &NodePair::Map {
                    observable: observable.clone(),
                    shared: shared.clone(),
                },
            )?;
            Ok(SharedValue::Map(shared))
        }
        Value::Array(observable) => {
            let shared = SharedArray::new();
            bind_pair(
                ctx,
                &NodePair::Array {
                    observable: observable.clone(),
                    shared: shared.clone(),
                },
            )?;
            Ok(SharedValue::Array(shared))
        }
        Value::Opaque(_) => Err(Unsupported::Observable(value.kind()).into()),
    }
}

/// Deep-copy a shared value into fresh observable values.
///
/// Text nested in a map is left out, text nested in an array becomes a
/// [`text_placeholder`]; both are logged. Text at the top level is an error.
pub fn to_plain(value: &SharedValue) -> std::result::Result<Value, Unsupported> {
    match value {
        SharedValue::Null => Ok(Value::Null),
        SharedValue::Bool(b) => Ok(Value::Bool(*b)),
        SharedValue::Number(n) => Ok(Value::Number(*n)),
        SharedValue::String(s) => Ok(Value::String(s.clone())),
        SharedValue::Map(map) => {
            let entries = map.entries().into_iter().filter_map(|(key, child)| match &child {
                SharedValue::Text(text) => {
                    warn!(key = %key, container = %text.id(), "{}; key skipped", Unsupported::SharedText);
                    None
                }
                _ => to_plain(&child).ok().map(|plain| (key, plain)),
            });
            Ok(Value::Map(ObservableMap::from_entries(entries)))
        }
        SharedValue::Array(array) => Ok(Value::Array(ObservableArray::from_values(
            array.iter().map(|child| to_plain_slot(&child)),
        ))),
        SharedValue::Text(_) => Err(Unsupported::SharedText),
    }
}

/// Like [`to_plain`], but shared text becomes a placeholder so array
/// positions stay aligned.
pub fn to_plain_slot(value: &SharedValue) -> Value {
    match value {
        SharedValue::Text(text) => {
            warn!(container = %text.id(), "{}; keeping a placeholder", Unsupported::SharedText);
            text_placeholder(text)
        }
        other => to_plain(other).unwrap_or(Value::Null),
    }
}

/// Opaque observable stand-in for a shared text.
pub fn text_placeholder(text: &SharedText) -> Value {
    Value::Opaque(Opaque::foreign(TEXT_PLACEHOLDER, text.clone()))
}

/// Deep equality across the two models.
///
/// `Undefined` and `Null` both equal shared `Null`, NaN equals NaN and
/// containers must be of the same kind. An opaque value equals the `Null`
/// stored in its place, a text placeholder equals its text.
pub fn values_equal(observable: &Value, shared: &SharedValue) -> bool {
    match (observable, shared) {
        (Value::Undefined | Value::Null, SharedValue::Null) => true,
        (Value::Bool(a), SharedValue::Bool(b)) => a == b,
        (Value::Number(a), SharedValue::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
        (Value::String(a), SharedValue::String(b)) => a == b,
        (Value::Map(a), SharedValue::Map(b)) => maps_equal(a, b),
        (Value::Array(a), SharedValue::Array(b)) => arrays_equal(a, b),
        (Value::Opaque(opaque), SharedValue::Text(text)) => opaque
            .downcast_ref::<SharedText>()
            .map_or(false, |placeholder| placeholder == text),
        (Value::Opaque(opaque), SharedValue::Null) => opaque.downcast_ref::<SharedText>().is_none(),
        _ => false,
    }
}

/// Equality of one map slot, where an absent shared key matches an
/// `Undefined` or unsupported observable value.
pub fn map_slot_equal(observable: &Value, shared: Option<&SharedValue>) -> bool {
    match (observable, shared) {
        (Value::Undefined | Value::Opaque(_), None) => true,
        (Value::Undefined, Some(SharedValue::Text(_))) => true,
        (_, None) | (Value::Undefined, Some(_)) => false,
        (value, Some(shared)) => values_equal(value, shared),
    }
}

pub fn maps_equal(observable: &ObservableMap, shared: &SharedMap) -> bool {
    let entries = observable.entries();
    let matched = entries
        .iter()
        .all(|(key, value)| map_slot_equal(value, shared.get(key).as_ref()));
    matched
        && shared
            .entries()
            .iter()
            .filter(|(key, _)| !observable.contains_key(key))
            .all(|(_, value)| map_slot_equal(&Value::Undefined, Some(value)))
}

pub fn arrays_equal(observable: &ObservableArray, shared: &SharedArray) -> bool {
    let left = observable.to_vec();
    let right = shared.to_vec();
    left.len() == right.len() && left.iter().zip(&right).all(|(a, b)| values_equal(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BindOptions;
    use serde_json::json;
    use tandem_observable::observable;
    use tandem_shared::Doc;

    #[test]
    fn test_primitives_and_undefined() {
        assert!(values_equal(&Value::Undefined, &SharedValue::Null));
        assert!(values_equal(&Value::Null, &SharedValue::Null));
        assert!(values_equal(&Value::Number(f64::NAN), &SharedValue::Number(f64::NAN)));
        assert!(values_equal(&Value::Number(0.0), &SharedValue::Number(-0.0)));
        assert!(!values_equal(&Value::from("1"), &SharedValue::Number(1.0)));
        assert!(!values_equal(&Value::Bool(false), &SharedValue::Null));
    }

    #[test]
    fn test_map_slots() {
        assert!(map_slot_equal(&Value::Undefined, None));
        assert!(!map_slot_equal(&Value::Undefined, Some(&SharedValue::Null)));
        assert!(!map_slot_equal(&Value::Null, None));
        assert!(map_slot_equal(&Value::Null, Some(&SharedValue::Null)));
        assert!(map_slot_equal(&Value::Opaque(Opaque::symbol("s")), None));
    }

    #[test]
    fn test_container_kinds_must_match() {
        let empty_map = SharedValue::Map(SharedMap::new());
        let empty_array = SharedValue::Array(SharedArray::new());
        assert!(values_equal(&observable(json!({})), &empty_map));
        assert!(!values_equal(&observable(json!({})), &empty_array));
        assert!(!values_equal(&observable(json!([])), &empty_map));
    }

    #[test]
    fn test_deep_equality() {
        let shared = SharedValue::from_json(json!({"a": [1, {"b": null}], "c": "x"}));
        assert!(values_equal(&observable(json!({"a": [1, {"b": null}], "c": "x"})), &shared));
        assert!(!values_equal(&observable(json!({"a": [1, {"b": 2}], "c": "x"})), &shared));
        assert!(!values_equal(&observable(json!({"a": [1, {"b": null}]})), &shared));
    }

    #[test]
    fn test_to_plain_copies_into_fresh_containers() {
        let shared = SharedValue::from_json(json!({"list": [1, "two", {"three": 3}]}));
        let plain = to_plain(&shared).unwrap();
        assert_eq!(plain.to_json(), json!({"list": [1, "two", {"three": 3}]}));
        assert!(values_equal(&plain, &shared));
    }

    #[test]
    fn test_text_placeholders() {
        let text = SharedText::new("hi");
        assert_eq!(to_plain(&SharedValue::Text(text.clone())), Err(Unsupported::SharedText));

        let array = SharedValue::Array(SharedArray::from_values(vec![
            SharedValue::from(1),
            SharedValue::Text(text.clone()),
        ]));
        let plain = to_plain(&array).unwrap();
        let slot = plain.as_array().unwrap().get(1);
        assert!(values_equal(&slot, &SharedValue::Text(text)));
        assert!(values_equal(&plain, &array));

        let map = SharedValue::Map(SharedMap::from_entries(vec![(
            "t".to_string(),
            SharedValue::Text(SharedText::new("x")),
        )]));
        let plain = to_plain(&map).unwrap();
        assert!(plain.as_map().unwrap().is_empty());
        assert!(values_equal(&plain, &map));
    }

    #[test]
    fn test_to_shared_binds_containers() {
        let ctx = BindContext::new(BindOptions::default());
        let value = observable(json!({"a": {"b": [1, 2]}}));
        let shared = to_shared(&ctx, &value).unwrap();
        assert_eq!(shared.to_json(), json!({"a": {"b": [1, 2]}}));
        let root = value.as_map().unwrap();
        assert!(ctx
            .cache()
            .is_bound_together(root.id(), shared.container_id().unwrap()));
        assert_eq!(ctx.cache().len(), 3);
    }

    #[test]
    fn test_to_shared_rejects_opaque() {
        let ctx = BindContext::new(BindOptions::default());
        let err = to_shared(&ctx, &Value::Opaque(Opaque::function(|| ()))).unwrap_err();
        assert!(matches!(err, crate::BindError::Unsupported(Unsupported::Observable(_))));
        assert_eq!(to_shared(&ctx, &Value::Undefined).unwrap(), SharedValue::Null);
    }

    #[test]
    fn test_identity_cache() {
        let doc = Doc::with_client_id(1);
        let shared = doc.get_map("root");
        let node = ObservableMap::new();
        let cache = IdentityCache::new();
        assert!(!cache.is_bound_together(node.id(), shared.id()));
        cache.remember(node.id(), shared.id());
        assert!(cache.is_bound_together(node.id(), shared.id()));
        assert_eq!(cache.forget(node.id()).as_ref(), Some(shared.id()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_identity_cache_keeps_one_pair_per_side() {
        let doc = Doc::with_client_id(1);
        let first = doc.get_map("first");
        let second = doc.get_map("second");
        let node = ObservableMap::new();
        let other = ObservableMap::new();
        let cache = IdentityCache::new();

        cache.remember(node.id(), first.id());
        cache.remember(node.id(), second.id());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.forget_container(first.id()), None);

        cache.remember(other.id(), second.id());
        assert!(!cache.is_bound_together(node.id(), second.id()));
        assert_eq!(cache.forget_container(second.id()), Some(other.id()));
        assert!(cache.is_empty());
    }
}
