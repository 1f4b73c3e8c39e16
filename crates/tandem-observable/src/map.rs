//! Observable string-keyed maps.

use crate::node::{attach, detach, Body, Node, NodeId};
use crate::record::{PathSegment, Record};
use crate::scheduler::Subscription;
use crate::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A string-keyed observable container.
///
/// Cloning yields another handle to the same container.
#[derive(Clone)]
pub struct ObservableMap {
    node: Arc<Node>,
}

impl ObservableMap {
    pub fn new() -> Self {
        Self {
            node: Node::new(Body::Map(BTreeMap::new())),
        }
    }

    /// Build a map without emitting records.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let map = Self::new();
        {
            let mut body = map.node.body.write();
            if let Body::Map(fields) = &mut *body {
                for (key, value) in entries {
                    let key = key.into();
                    attach(&value, &map.node, PathSegment::Key(key.clone()));
                    if let Some(old) = fields.insert(key.clone(), value) {
                        detach(&old, &map.node, &PathSegment::Key(key));
                    }
                }
            }
        }
        map
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn ptr_eq(&self, other: &ObservableMap) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    fn with_fields<R>(&self, f: impl FnOnce(&BTreeMap<String, Value>) -> R) -> R {
        match &*self.node.body.read() {
            Body::Map(fields) => f(fields),
            Body::Array(_) => f(&BTreeMap::new()),
        }
    }

    /// Value at `key`, `Undefined` when absent.
    pub fn get(&self, key: &str) -> Value {
        self.with_fields(|fields| fields.get(key).cloned().unwrap_or(Value::Undefined))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.with_fields(|fields| fields.contains_key(key))
    }

    pub fn keys(&self) -> Vec<String> {
        self.with_fields(|fields| fields.keys().cloned().collect())
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.with_fields(|fields| fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn len(&self) -> usize {
        self.with_fields(|fields| fields.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `value` at `key`. Writing the same value (SameValue) to an
    /// existing key records nothing.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let old = {
            let mut body = self.node.body.write();
            let Body::Map(fields) = &mut *body else {
                return;
            };
            match fields.get(&key) {
                Some(existing) if *existing == value => return,
                _ => {}
            }
            fields
                .insert(key.clone(), value.clone())
                .unwrap_or(Value::Undefined)
        };
        let segment = PathSegment::Key(key);
        detach(&old, &self.node, &segment);
        attach(&value, &self.node, segment.clone());
        self.node.notify(Record::set(self.node.id, vec![segment], value, old));
    }

    /// Remove `key`, returning the previous value. Always records a delete,
    /// even for absent keys.
    pub fn delete(&self, key: &str) -> Value {
        let old = {
            let mut body = self.node.body.write();
            let Body::Map(fields) = &mut *body else {
                return Value::Undefined;
            };
            fields.remove(key).unwrap_or(Value::Undefined)
        };
        let segment = PathSegment::Key(key.to_string());
        detach(&old, &self.node, &segment);
        self.node.notify(Record::delete(self.node.id, vec![segment], old.clone()));
        old
    }

    /// Receive batched records for writes to this map and everything below
    /// it, with paths relative to this map.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Record]) + Send + Sync + 'static,
    {
        Subscription::install(&self.node, Box::new(listener))
    }

    pub fn to_json(&self) -> serde_json::Value {
        let entries = self.entries();
        let mut object = serde_json::Map::new();
        for (key, value) in entries {
            if value.is_serialized_in_map() {
                object.insert(key, value.to_json());
            }
        }
        serde_json::Value::Object(object)
    }
}

impl Default for ObservableMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObservableMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObservableMap({}){}", self.id(), self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;
    use crate::scheduler::flush;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder(map: &ObservableMap) -> (Arc<Mutex<Vec<Vec<Record>>>>, Subscription) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&batches);
        let sub = map.subscribe(move |records| sink.lock().push(records.to_vec()));
        (batches, sub)
    }

    #[test]
    fn test_set_and_delete_records() {
        let map = ObservableMap::new();
        let (batches, _sub) = recorder(&map);

        map.set("a", "x");
        map.set("a", "x");
        map.delete("a");
        flush();

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].kind, RecordKind::Set);
        assert_eq!(batch[0].path, vec![PathSegment::Key("a".into())]);
        assert_eq!(batch[0].old, Value::Undefined);
        assert_eq!(batch[0].target, map.id());
        assert_eq!(batch[1].kind, RecordKind::Delete);
        assert_eq!(batch[1].old, Value::from("x"));
    }

    #[test]
    fn test_nested_records_are_prefixed() {
        let root = ObservableMap::new();
        let child = ObservableMap::new();
        root.set("child", child.clone());
        let (batches, _sub) = recorder(&root);

        child.set("x", 1);
        flush();

        let batches = batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0][0].path,
            vec![PathSegment::Key("child".into()), PathSegment::Key("x".into())]
        );
        assert_eq!(batches[0][0].target, child.id());
    }

    #[test]
    fn test_detached_child_stops_reporting() {
        let root = ObservableMap::new();
        let child = ObservableMap::new();
        root.set("child", child.clone());
        root.delete("child");
        flush();
        let (batches, _sub) = recorder(&root);

        child.set("x", 1);
        flush();
        assert!(batches.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_drops_pending() {
        let map = ObservableMap::new();
        let (batches, sub) = recorder(&map);
        map.set("a", 1);
        sub.unsubscribe();
        sub.unsubscribe();
        flush();
        assert!(batches.lock().is_empty());
        assert!(!sub.is_active());
    }

    #[test]
    fn test_snapshot_skips_undefined() {
        let map = ObservableMap::new();
        map.set("a", Value::Undefined);
        map.set("b", Value::Null);
        assert_eq!(map.to_json(), json!({"b": null}));
        assert!(map.contains_key("a"));
    }
}
