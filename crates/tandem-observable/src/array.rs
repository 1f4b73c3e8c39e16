//! Observable arrays.
//!
//! The structural methods (`push`, `pop`, `shift`, `unshift`, `splice`)
//! are expressed as the same sequence of index writes, index deletes and
//! `length` writes that the corresponding `Array.prototype` algorithms
//! perform, so subscribers see exactly the record stream a proxied JS array
//! would produce:
//!
//! - writing past the end grows the array silently (no `length` record)
//! - shrinking through `length` records only the `length` change
//! - rewriting a slot with the same value records nothing

use crate::node::{attach, detach, Body, Node, NodeId};
use crate::record::{PathSegment, Record};
use crate::scheduler::Subscription;
use crate::value::Value;
use std::sync::Arc;

/// An index-addressed observable container. May contain holes.
#[derive(Clone)]
pub struct ObservableArray {
    node: Arc<Node>,
}

impl ObservableArray {
    pub fn new() -> Self {
        Self {
            node: Node::new(Body::Array(Vec::new())),
        }
    }

    /// Build an array without emitting records.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let array = Self::new();
        {
            let mut body = array.node.body.write();
            if let Body::Array(slots) = &mut *body {
                for value in values {
                    attach(&value, &array.node, PathSegment::Index(slots.len()));
                    slots.push(Some(value));
                }
            }
        }
        array
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn id(&self) -> NodeId {
        self.node.id
    }

    pub fn ptr_eq(&self, other: &ObservableArray) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    fn with_slots<R>(&self, f: impl FnOnce(&[Option<Value>]) -> R) -> R {
        match &*self.node.body.read() {
            Body::Array(slots) => f(slots),
            Body::Map(_) => f(&[]),
        }
    }

    pub fn len(&self) -> usize {
        self.with_slots(|slots| slots.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`; `Undefined` for holes and out-of-range indices.
    pub fn get(&self, index: usize) -> Value {
        self.with_slots(|slots| slots.get(index).cloned().flatten().unwrap_or(Value::Undefined))
    }

    /// Whether `index` holds a value (is in range and not a hole).
    pub fn has(&self, index: usize) -> bool {
        self.with_slots(|slots| matches!(slots.get(index), Some(Some(_))))
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.with_slots(|slots| {
            slots
                .iter()
                .map(|s| s.clone().unwrap_or(Value::Undefined))
                .collect()
        })
    }

    /// `array[index] = value`.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        self.write_index(index, value.into());
    }

    /// `delete array[index]`: leaves a hole, length unchanged.
    pub fn delete(&self, index: usize) -> Value {
        self.delete_index(index)
    }

    /// `array.length = len`.
    pub fn set_len(&self, len: usize) {
        let (old_len, removed) = {
            let mut body = self.node.body.write();
            let Body::Array(slots) = &mut *body else {
                return;
            };
            let old_len = slots.len();
            if len == old_len {
                return;
            }
            let removed = if len < old_len {
                slots.split_off(len)
            } else {
                slots.resize(len, None);
                Vec::new()
            };
            (old_len, removed)
        };
        for (offset, value) in removed.into_iter().enumerate() {
            if let Some(value) = value {
                detach(&value, &self.node, &PathSegment::Index(len + offset));
            }
        }
        self.node.notify(Record::set(
            self.node.id,
            vec![PathSegment::Length],
            Value::from(len),
            Value::from(old_len),
        ));
    }

    pub fn push(&self, value: impl Into<Value>) -> usize {
        self.push_all(vec![value.into()])
    }

    pub fn push_all(&self, values: Vec<Value>) -> usize {
        let len = self.len();
        let count = values.len();
        for (offset, value) in values.into_iter().enumerate() {
            self.write_index(len + offset, value);
        }
        self.set_len(len + count);
        len + count
    }

    pub fn pop(&self) -> Value {
        let len = self.len();
        if len == 0 {
            self.set_len(0);
            return Value::Undefined;
        }
        let last = self.get(len - 1);
        self.delete_index(len - 1);
        self.set_len(len - 1);
        last
    }

    pub fn shift(&self) -> Value {
        let len = self.len();
        if len == 0 {
            self.set_len(0);
            return Value::Undefined;
        }
        let first = self.get(0);
        for from in 1..len {
            self.move_slot(from, from - 1);
        }
        self.delete_index(len - 1);
        self.set_len(len - 1);
        first
    }

    pub fn unshift(&self, values: Vec<Value>) -> usize {
        let len = self.len();
        let count = values.len();
        if count > 0 {
            for k in (1..=len).rev() {
                self.move_slot(k - 1, k + count - 1);
            }
            for (j, value) in values.into_iter().enumerate() {
                self.write_index(j, value);
            }
        }
        self.set_len(len + count);
        len + count
    }

    /// `array.splice(start, delete_count, ...items)`. A negative `start`
    /// counts from the end. Returns the removed elements.
    pub fn splice(&self, start: isize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        let len = self.len();
        let start = if start < 0 {
            len.saturating_sub(start.unsigned_abs())
        } else {
            (start as usize).min(len)
        };
        let delete_count = delete_count.min(len - start);
        let removed: Vec<Value> = (start..start + delete_count).map(|i| self.get(i)).collect();
        let item_count = items.len();

        if item_count < delete_count {
            for k in start..(len - delete_count) {
                self.move_slot(k + delete_count, k + item_count);
            }
            for k in ((len - delete_count + item_count)..len).rev() {
                self.delete_index(k);
            }
        } else if item_count > delete_count {
            for k in ((start + 1)..=(len - delete_count)).rev() {
                self.move_slot(k + delete_count - 1, k + item_count - 1);
            }
        }
        for (j, item) in items.into_iter().enumerate() {
            self.write_index(start + j, item);
        }
        self.set_len(len - delete_count + item_count);
        removed
    }

    /// Insert a single value at `index`.
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.splice(index as isize, 0, vec![value.into()]);
    }

    /// Receive batched records for writes to this array and everything below
    /// it, with paths relative to this array.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[crate::record::Record]) + Send + Sync + 'static,
    {
        Subscription::install(&self.node, Box::new(listener))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.to_vec().iter().map(Value::to_json).collect())
    }

    /// Copy slot `from` to `to`, or punch a hole at `to` when `from` is one.
    fn move_slot(&self, from: usize, to: usize) {
        if self.has(from) {
            self.write_index(to, self.get(from));
        } else {
            self.delete_index(to);
        }
    }

    fn write_index(&self, index: usize, value: Value) {
        let old = {
            let mut body = self.node.body.write();
            let Body::Array(slots) = &mut *body else {
                return;
            };
            let existing = slots.get(index).cloned().flatten();
            if let Some(existing) = &existing {
                if *existing == value {
                    return;
                }
            }
            if index >= slots.len() {
                slots.resize(index + 1, None);
            }
            slots[index] = Some(value.clone());
            existing.unwrap_or(Value::Undefined)
        };
        let segment = PathSegment::Index(index);
        detach(&old, &self.node, &segment);
        attach(&value, &self.node, segment.clone());
        self.node.notify(Record::set(self.node.id, vec![segment], value, old));
    }

    fn delete_index(&self, index: usize) -> Value {
        let old = {
            let mut body = self.node.body.write();
            let Body::Array(slots) = &mut *body else {
                return Value::Undefined;
            };
            slots
                .get_mut(index)
                .and_then(Option::take)
                .unwrap_or(Value::Undefined)
        };
        let segment = PathSegment::Index(index);
        detach(&old, &self.node, &segment);
        self.node.notify(Record::delete(self.node.id, vec![segment], old.clone()));
        old
    }
}

impl Default for ObservableArray {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObservableArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObservableArray({}){}", self.id(), self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::ObservableMap;
    use crate::record::RecordKind;
    use crate::scheduler::flush;
    use parking_lot::Mutex;
    use serde_json::json;

    fn letters(items: &[&str]) -> ObservableArray {
        ObservableArray::from_values(items.iter().map(|s| Value::from(*s)))
    }

    /// Compact rendering: "set 1 e b", "delete 2 c", "set length 2 3".
    fn capture(array: &ObservableArray, mutate: impl FnOnce(&ObservableArray)) -> Vec<String> {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&out);
        let sub = array.subscribe(move |records| {
            for r in records {
                let render = |v: &Value| match v {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Undefined => "u".into(),
                    other => format!("{:?}", other),
                };
                let line = match r.kind {
                    RecordKind::Set => format!("set {} {} {}", r.path[0], render(&r.value), render(&r.old)),
                    RecordKind::Delete => format!("delete {} {}", r.path[0], render(&r.old)),
                };
                sink.lock().push(line);
            }
        });
        mutate(array);
        flush();
        sub.unsubscribe();
        let lines = out.lock().clone();
        lines
    }

    #[test]
    fn test_push_records() {
        let a = letters(&["a", "b", "c"]);
        assert_eq!(capture(&a, |a| { a.push("d"); }), vec!["set 3 d u"]);
        assert_eq!(a.to_json(), json!(["a", "b", "c", "d"]));
    }

    #[test]
    fn test_pop_records() {
        let a = letters(&["a", "b", "c"]);
        assert_eq!(
            capture(&a, |a| { a.pop(); }),
            vec!["delete 2 c", "set length 2 3"]
        );
    }

    #[test]
    fn test_shift_records() {
        let a = letters(&["a", "b", "c"]);
        assert_eq!(
            capture(&a, |a| { a.shift(); }),
            vec!["set 0 b a", "set 1 c b", "delete 2 c", "set length 2 3"]
        );
        assert_eq!(a.to_json(), json!(["b", "c"]));
    }

    #[test]
    fn test_unshift_records() {
        let a = letters(&["a", "b", "c"]);
        assert_eq!(
            capture(&a, |a| { a.unshift(vec!["d".into()]); }),
            vec!["set 3 c u", "set 2 b c", "set 1 a b", "set 0 d a"]
        );
        assert_eq!(a.to_json(), json!(["d", "a", "b", "c"]));
    }

    #[test]
    fn test_splice_delete_records() {
        let a = letters(&["a", "b", "c", "d"]);
        assert_eq!(
            capture(&a, |a| { a.splice(1, 2, vec![]); }),
            vec!["set 1 d b", "delete 3 d", "delete 2 c", "set length 2 4"]
        );
        assert_eq!(a.to_json(), json!(["a", "d"]));
    }

    #[test]
    fn test_splice_replace_and_grow() {
        let a = letters(&["a", "b", "c", "d"]);
        let lines = capture(&a, |a| {
            a.splice(1, 2, vec!["e".into(), "f".into(), "g".into()]);
        });
        assert_eq!(lines, vec!["set 4 d u", "set 1 e b", "set 2 f c", "set 3 g d"]);
        assert_eq!(a.to_json(), json!(["a", "e", "f", "g", "d"]));
    }

    #[test]
    fn test_length_assignment() {
        let a = letters(&["a", "b", "c"]);
        assert_eq!(capture(&a, |a| a.set_len(2)), vec!["set length 2 3"]);
        assert_eq!(a.to_json(), json!(["a", "b"]));

        assert_eq!(capture(&a, |a| a.set_len(4)), vec!["set length 4 2"]);
        assert_eq!(a.to_json(), json!(["a", "b", null, null]));
        assert!(!a.has(3));
    }

    #[test]
    fn test_same_value_write_is_silent() {
        let a = letters(&["a"]);
        assert!(capture(&a, |a| a.set(0, "a")).is_empty());
    }

    #[test]
    fn test_negative_splice_start() {
        let a = letters(&["a", "b", "c"]);
        let removed = a.splice(-1, 1, vec![]);
        assert_eq!(removed, vec![Value::from("c")]);
        assert_eq!(a.to_json(), json!(["a", "b"]));
    }

    #[test]
    fn test_moved_child_reports_new_index() {
        let child = ObservableMap::new();
        let a = ObservableArray::from_values(vec![Value::from("x"), Value::Map(child.clone())]);
        a.shift();
        flush();

        let paths = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&paths);
        let _sub = a.subscribe(move |records| {
            sink.lock().extend(records.iter().map(|r| r.path.clone()));
        });
        child.set("k", 1);
        flush();
        assert_eq!(
            *paths.lock(),
            vec![vec![PathSegment::Index(0), PathSegment::Key("k".into())]]
        );
    }
}
