//! Mutation records delivered to subscribers.

use crate::node::NodeId;
use crate::value::Value;
use std::fmt;

/// One step of a path from a subscribed container to the written slot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
    /// The `length` slot of an array.
    Length,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "{}", i),
            PathSegment::Length => write!(f, "length"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Set,
    Delete,
}

/// A primitive write observed on a container or one of its descendants.
///
/// For `Delete` records `value` is `Undefined` and `old` holds the removed
/// value. Array length changes are `Set` records on [`PathSegment::Length`]
/// carrying the new and previous lengths as numbers.
///
/// `target` is the container that was written. It stays the same while the
/// record travels up to ancestor subscribers, whereas `path` grows.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub kind: RecordKind,
    pub target: NodeId,
    pub path: Vec<PathSegment>,
    pub value: Value,
    pub old: Value,
}

impl Record {
    pub fn set(target: NodeId, path: Vec<PathSegment>, value: Value, old: Value) -> Self {
        Self {
            kind: RecordKind::Set,
            target,
            path,
            value,
            old,
        }
    }

    pub fn delete(target: NodeId, path: Vec<PathSegment>, old: Value) -> Self {
        Self {
            kind: RecordKind::Delete,
            target,
            path,
            value: Value::Undefined,
            old,
        }
    }

    /// The segment naming the written slot.
    pub fn last_segment(&self) -> Option<&PathSegment> {
        self.path.last()
    }

    /// Path of the container that owns the written slot.
    pub fn parent_path(&self) -> &[PathSegment] {
        match self.path.split_last() {
            Some((_, parent)) => parent,
            None => &[],
        }
    }

    /// Re-root the record one level up.
    pub(crate) fn prefixed(&self, segment: PathSegment) -> Record {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.push(segment);
        path.extend(self.path.iter().cloned());
        Record {
            kind: self.kind,
            target: self.target,
            path,
            value: self.value.clone(),
            old: self.old.clone(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path: Vec<String> = self.path.iter().map(|s| s.to_string()).collect();
        match self.kind {
            RecordKind::Set => write!(f, "set {} {:?} (was {:?})", path.join("."), self.value, self.old),
            RecordKind::Delete => write!(f, "delete {} (was {:?})", path.join("."), self.old),
        }
    }
}
