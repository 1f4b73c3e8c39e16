//! Shared maps.

use crate::doc::Doc;
use crate::error::{Result, SharedError};
use crate::event::{Callback, Event, ObserverHandle, TransactionInfo};
use crate::handle::{check_detached, Handle, PrelimBody, Target};
use crate::id::{ContainerId, ContainerKind};
use crate::value::SharedValue;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// A replicated string-keyed map with last-writer-wins keys.
#[derive(Clone)]
pub struct SharedMap {
    handle: Handle,
}

impl SharedMap {
    /// A detached map; it joins a document when written into one.
    pub fn new() -> Self {
        Self {
            handle: Handle::prelim(ContainerKind::Map, PrelimBody::Map(BTreeMap::new())),
        }
    }

    pub fn from_entries(entries: Vec<(String, SharedValue)>) -> Self {
        Self {
            handle: Handle::prelim(ContainerKind::Map, PrelimBody::Map(entries.into_iter().collect())),
        }
    }

    pub(crate) fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn id(&self) -> &ContainerId {
        &self.handle.id
    }

    /// The owning document; `None` while detached.
    pub fn doc(&self) -> Option<Doc> {
        self.handle.doc()
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_attached()
    }

    pub fn get(&self, key: &str) -> Option<SharedValue> {
        match self.handle.target() {
            Target::Doc(doc) => {
                let weak = Arc::downgrade(&doc);
                doc.read(|state| state.map_get(self.id(), key, &weak))
            }
            Target::Prelim => self
                .handle
                .read_prelim(|body| match body {
                    PrelimBody::Map(fields) => fields.get(key).cloned(),
                    _ => None,
                })
                .flatten(),
            Target::Dropped => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        match self.handle.target() {
            Target::Doc(doc) => doc.read(|state| state.map_keys(self.id())),
            Target::Prelim => self
                .handle
                .read_prelim(|body| match body {
                    PrelimBody::Map(fields) => fields.keys().cloned().collect(),
                    _ => Vec::new(),
                })
                .unwrap_or_default(),
            Target::Dropped => Vec::new(),
        }
    }

    /// Live entries, sorted by key.
    pub fn entries(&self) -> Vec<(String, SharedValue)> {
        match self.handle.target() {
            Target::Doc(doc) => {
                let weak: Weak<_> = Arc::downgrade(&doc);
                doc.read(|state| state.map_entries(self.id(), &weak))
            }
            Target::Prelim => self
                .handle
                .read_prelim(|body| match body {
                    PrelimBody::Map(fields) => fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    _ => Vec::new(),
                })
                .unwrap_or_default(),
            Target::Dropped => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `value` at `key`. Detached containers in `value` join this
    /// map's document.
    pub fn set(&self, key: impl Into<String>, value: impl Into<SharedValue>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        match self.handle.target() {
            Target::Doc(doc) => doc.mutate(|state, inner| state.map_set(inner, self.id(), key, value)),
            Target::Prelim => {
                check_detached(&value)?;
                self.handle.write_prelim(|body| {
                    if let PrelimBody::Map(fields) = body {
                        fields.insert(key, value);
                    }
                });
                Ok(())
            }
            Target::Dropped => Err(SharedError::DocumentDropped),
        }
    }

    /// Remove `key`. Removing an absent key changes nothing.
    pub fn delete(&self, key: &str) -> Result<()> {
        match self.handle.target() {
            Target::Doc(doc) => doc.mutate(|state, _| state.map_delete(self.id(), key)),
            Target::Prelim => {
                self.handle.write_prelim(|body| {
                    if let PrelimBody::Map(fields) = body {
                        fields.remove(key);
                    }
                });
                Ok(())
            }
            Target::Dropped => Err(SharedError::DocumentDropped),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self.handle.target() {
            Target::Doc(doc) => doc.read(|state| state.to_json(self.id())),
            _ => {
                let mut object = serde_json::Map::new();
                for (key, value) in self.entries() {
                    object.insert(key, value.to_json());
                }
                serde_json::Value::Object(object)
            }
        }
    }

    /// Events for changes to this map's own keys.
    pub fn observe<F>(&self, f: F) -> ObserverHandle
    where
        F: Fn(&Event, &TransactionInfo) + Send + Sync + 'static,
    {
        self.handle.observe(Callback::Shallow(Arc::new(f)))
    }

    /// Events for this map and every container below it, one batch per
    /// transaction.
    pub fn observe_deep<F>(&self, f: F) -> ObserverHandle
    where
        F: Fn(&[Event], &TransactionInfo) + Send + Sync + 'static,
    {
        self.handle.observe(Callback::Deep(Arc::new(f)))
    }
}

impl Default for SharedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SharedMap {
    fn eq(&self, other: &Self) -> bool {
        self.handle.id == other.handle.id
    }
}

impl std::fmt::Debug for SharedMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedMap({}){}", self.id(), self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detached_map_integrates() {
        let doc = Doc::with_client_id(1);
        let root = doc.get_map("root");

        let child = SharedMap::new();
        child.set("a", "x").unwrap();
        assert!(child.doc().is_none());

        root.set("child", child.clone()).unwrap();
        assert!(child.doc().is_some());
        assert_eq!(root.to_json(), json!({"child": {"a": "x"}}));

        let read_back = root.get("child").unwrap();
        assert_eq!(read_back, SharedValue::Map(child.clone()));

        child.set("b", true).unwrap();
        assert_eq!(root.to_json(), json!({"child": {"a": "x", "b": true}}));
    }

    #[test]
    fn test_reinserting_attached_map_fails() {
        let doc = Doc::with_client_id(1);
        let root = doc.get_map("root");
        let child = SharedMap::new();
        root.set("one", child.clone()).unwrap();
        assert_eq!(
            root.set("two", child.clone()),
            Err(SharedError::AlreadyIntegrated(child.id().clone()))
        );
    }

    #[test]
    fn test_null_is_kept_and_delete_removes() {
        let doc = Doc::with_client_id(1);
        let root = doc.get_map("root");
        root.set("n", SharedValue::Null).unwrap();
        assert_eq!(root.get("n"), Some(SharedValue::Null));
        root.delete("n").unwrap();
        assert_eq!(root.get("n"), None);
        assert!(root.is_empty());
    }
}
