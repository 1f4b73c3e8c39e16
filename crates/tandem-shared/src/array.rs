//! Shared arrays.

use crate::doc::Doc;
use crate::error::{Result, SharedError};
use crate::event::{Callback, Event, ObserverHandle, TransactionInfo};
use crate::handle::{check_detached, Handle, PrelimBody, Target};
use crate::id::{ContainerId, ContainerKind};
use crate::value::SharedValue;
use std::sync::Arc;

/// A replicated ordered sequence (RGA).
#[derive(Clone)]
pub struct SharedArray {
    handle: Handle,
}

impl SharedArray {
    /// A detached array; it joins a document when written into one.
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn from_values(values: Vec<SharedValue>) -> Self {
        Self {
            handle: Handle::prelim(ContainerKind::Array, PrelimBody::List(values)),
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

    pub fn doc(&self) -> Option<Doc> {
        self.handle.doc()
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_attached()
    }

    pub fn len(&self) -> usize {
        match self.handle.target() {
            Target::Doc(doc) => doc.read(|state| state.list_len(self.id())),
            Target::Prelim => self
                .handle
                .read_prelim(|body| match body {
                    PrelimBody::List(items) => items.len(),
                    _ => 0,
                })
                .unwrap_or(0),
            Target::Dropped => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<SharedValue> {
        match self.handle.target() {
            Target::Doc(doc) => {
                let weak = Arc::downgrade(&doc);
                doc.read(|state| state.list_get(self.id(), index, &weak))
            }
            Target::Prelim => self
                .handle
                .read_prelim(|body| match body {
                    PrelimBody::List(items) => items.get(index).cloned(),
                    _ => None,
                })
                .flatten(),
            Target::Dropped => None,
        }
    }

    pub fn to_vec(&self) -> Vec<SharedValue> {
        match self.handle.target() {
            Target::Doc(doc) => {
                let weak = Arc::downgrade(&doc);
                doc.read(|state| state.list_values(self.id(), &weak))
            }
            Target::Prelim => self
                .handle
                .read_prelim(|body| match body {
                    PrelimBody::List(items) => items.clone(),
                    _ => Vec::new(),
                })
                .unwrap_or_default(),
            Target::Dropped => Vec::new(),
        }
    }

    pub fn iter(&self) -> std::vec::IntoIter<SharedValue> {
        self.to_vec().into_iter()
    }

    /// Insert `values` so the first lands at `index`.
    pub fn insert(&self, index: usize, values: Vec<SharedValue>) -> Result<()> {
        match self.handle.target() {
            Target::Doc(doc) => {
                doc.mutate(|state, inner| state.list_insert(inner, self.id(), index, values))
            }
            Target::Prelim => {
                for value in &values {
                    check_detached(value)?;
                }
                self.handle
                    .write_prelim(|body| match body {
                        PrelimBody::List(items) if index <= items.len() => {
                            items.splice(index..index, values);
                            Ok(())
                        }
                        PrelimBody::List(items) => Err(SharedError::IndexOutOfBounds {
                            index,
                            length: items.len(),
                        }),
                        _ => Ok(()),
                    })
                    .unwrap_or(Ok(()))
            }
            Target::Dropped => Err(SharedError::DocumentDropped),
        }
    }

    pub fn push(&self, value: impl Into<SharedValue>) -> Result<()> {
        self.insert(self.len(), vec![value.into()])
    }

    /// Remove `count` elements starting at `index`.
    pub fn delete(&self, index: usize, count: usize) -> Result<()> {
        match self.handle.target() {
            Target::Doc(doc) => doc.mutate(|state, _| state.list_delete(self.id(), index, count)),
            Target::Prelim => self
                .handle
                .write_prelim(|body| match body {
                    PrelimBody::List(items) if index + count <= items.len() => {
                        items.drain(index..index + count);
                        Ok(())
                    }
                    PrelimBody::List(items) => Err(SharedError::IndexOutOfBounds {
                        index: index + count,
                        length: items.len(),
                    }),
                    _ => Ok(()),
                })
                .unwrap_or(Ok(())),
            Target::Dropped => Err(SharedError::DocumentDropped),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self.handle.target() {
            Target::Doc(doc) => doc.read(|state| state.to_json(self.id())),
            _ => serde_json::Value::Array(self.to_vec().iter().map(SharedValue::to_json).collect()),
        }
    }

    pub fn observe<F>(&self, f: F) -> ObserverHandle
    where
        F: Fn(&Event, &TransactionInfo) + Send + Sync + 'static,
    {
        self.handle.observe(Callback::Shallow(Arc::new(f)))
    }

    pub fn observe_deep<F>(&self, f: F) -> ObserverHandle
    where
        F: Fn(&[Event], &TransactionInfo) + Send + Sync + 'static,
    {
        self.handle.observe(Callback::Deep(Arc::new(f)))
    }
}

impl Default for SharedArray {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for SharedArray {
    fn eq(&self, other: &Self) -> bool {
        self.handle.id == other.handle.id
    }
}

impl std::fmt::Debug for SharedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedArray({}){}", self.id(), self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Change, Delta};
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_insert_delete_and_delta() {
        let doc = Doc::with_client_id(1);
        let list = doc.get_array("list");
        list.insert(0, vec!["a".into(), "b".into(), "c".into()]).unwrap();

        let deltas = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deltas);
        let _obs = list.observe(move |event, _| {
            if let Change::Array(delta) = &event.change {
                sink.lock().push(delta.clone());
            }
        });

        doc.transact(None, || {
            list.delete(1, 1).unwrap();
            list.insert(2, vec!["d".into()]).unwrap();
        });

        assert_eq!(list.to_json(), json!(["a", "c", "d"]));
        assert_eq!(
            *deltas.lock(),
            vec![vec![
                Delta::Retain(1),
                Delta::Delete(1),
                Delta::Retain(1),
                Delta::Insert(vec!["d".into()]),
            ]]
        );
    }

    #[test]
    fn test_out_of_bounds() {
        let doc = Doc::with_client_id(1);
        let list = doc.get_array("list");
        assert_eq!(
            list.delete(0, 1),
            Err(SharedError::IndexOutOfBounds { index: 1, length: 0 })
        );
        assert!(list.insert(2, vec![SharedValue::Null]).is_err());

        let detached = SharedArray::new();
        assert!(detached.delete(0, 1).is_err());
    }

    #[test]
    fn test_nested_containers_in_detached_array() {
        let doc = Doc::with_client_id(1);
        let root = doc.get_map("root");
        let inner = SharedArray::from_values(vec![1.into(), SharedValue::from_json(json!({"k": [true]}))]);
        root.set("arr", inner.clone()).unwrap();
        assert_eq!(root.to_json(), json!({"arr": [1, {"k": [true]}]}));
        assert_eq!(inner.len(), 2);
    }
}
