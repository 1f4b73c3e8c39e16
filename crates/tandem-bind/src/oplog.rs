//! Operation log parser.
//!
//! An observable array reports structural edits as the individual slot
//! writes a JS engine performs: `unshift` shifts every element up by one
//! (highest index first) and then writes index 0, `shift` shifts down and
//! deletes the vacated tail slot, and so on. This module turns such a batch
//! back into [`ArrayOp`]s that replay correctly against the array as it was
//! before the batch:
//!
//! - `length` records are reconciled against explicit deletes, producing
//!   synthetic deletes for truncation and null inserts for growth
//! - descending shift chains become one insert at the bottom of the chain
//! - ascending shift chains followed by tail deletes become one delete at
//!   the bottom of the chain
//! - writes into fresh slots past the end become inserts
//!
//! The matching is a heuristic tuned to the records produced by `push`,
//! `pop`, `shift`, `unshift` and `splice`. Hand-written index writes that
//! happen to look like a shift chain can be misread; the engine checks the
//! result and falls back to a full rewrite.

use std::fmt;
use tandem_observable::{NodeId, PathSegment, Record, RecordKind, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayOpKind {
    Insert,
    Set,
    Delete,
}

/// A semantic array edit at one index.
///
/// For `Set`, `old` is the overwritten value. For `Delete`, `value` is the
/// removed value (`Undefined` when it is unknown).
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayOp {
    pub kind: ArrayOpKind,
    pub index: usize,
    pub value: Value,
    pub old: Value,
}

impl ArrayOp {
    pub fn insert(index: usize, value: impl Into<Value>) -> Self {
        Self {
            kind: ArrayOpKind::Insert,
            index,
            value: value.into(),
            old: Value::Undefined,
        }
    }

    pub fn set(index: usize, value: impl Into<Value>, old: impl Into<Value>) -> Self {
        Self {
            kind: ArrayOpKind::Set,
            index,
            value: value.into(),
            old: old.into(),
        }
    }

    pub fn delete(index: usize, removed: impl Into<Value>) -> Self {
        Self {
            kind: ArrayOpKind::Delete,
            index,
            value: removed.into(),
            old: Value::Undefined,
        }
    }

    fn is_write(&self) -> bool {
        matches!(self.kind, ArrayOpKind::Set | ArrayOpKind::Insert)
    }
}

impl fmt::Display for ArrayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArrayOpKind::Insert => write!(f, "insert {} {:?}", self.index, self.value),
            ArrayOpKind::Set => write!(f, "set {} {:?} (was {:?})", self.index, self.value, self.old),
            ArrayOpKind::Delete => write!(f, "delete {} {:?}", self.index, self.value),
        }
    }
}

struct Entry {
    op: ArrayOp,
    /// A write into a slot that did not exist before the batch.
    appended: bool,
}

impl Entry {
    fn plain(op: ArrayOp) -> Self {
        Self {
            op,
            appended: false,
        }
    }
}

/// Parse records relative to one array.
///
/// Records that address a nested container (paths longer than one segment)
/// or a map key are ignored.
pub fn parse(records: &[Record]) -> Vec<ArrayOp> {
    let entries = normalize(records.iter().filter(|r| r.path.len() == 1));
    collapse(entries)
}

/// The ops of one array written during a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayBatch {
    pub target: NodeId,
    /// Path of the array below the subscribed container when its first
    /// record was emitted.
    pub path: Vec<PathSegment>,
    pub ops: Vec<ArrayOp>,
}

/// Parse records relative to a container that may hold arrays at any
/// depth. Records are grouped by the array that was written, in the order
/// the arrays first appear in the batch.
pub fn parse_grouped(records: &[Record]) -> Vec<ArrayBatch> {
    let mut groups: Vec<(NodeId, Vec<PathSegment>, Vec<&Record>)> = Vec::new();
    for record in records {
        if !matches!(
            record.last_segment(),
            Some(PathSegment::Index(_)) | Some(PathSegment::Length)
        ) {
            continue;
        }
        match groups.iter_mut().find(|(target, ..)| *target == record.target) {
            Some((_, _, members)) => members.push(record),
            None => groups.push((
                record.target,
                record.parent_path().to_vec(),
                vec![record],
            )),
        }
    }
    groups
        .into_iter()
        .map(|(target, path, members)| ArrayBatch {
            target,
            path,
            ops: collapse(normalize(members.into_iter())),
        })
        .collect()
}

fn as_len(value: &Value) -> Option<usize> {
    value
        .as_f64()
        .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0)
        .map(|n| n as usize)
}

fn normalize<'a>(records: impl Iterator<Item = &'a Record>) -> Vec<Entry> {
    let mut entries = Vec::new();
    let mut deletes = 0usize;
    let mut grown_to = 0usize;

    for record in records {
        match (record.kind, record.last_segment()) {
            (RecordKind::Set, Some(PathSegment::Length)) => {
                let (Some(new), Some(old)) = (as_len(&record.value), as_len(&record.old)) else {
                    continue;
                };
                if old > new {
                    let missing = (old - new).saturating_sub(deletes);
                    for _ in 0..missing {
                        entries.push(Entry::plain(ArrayOp::delete(new, Value::Undefined)));
                    }
                    grown_to = grown_to.min(new);
                } else if new > old {
                    for index in old..new {
                        entries.push(Entry::plain(ArrayOp::insert(index, Value::Null)));
                    }
                    grown_to = new;
                }
                deletes = 0;
            }
            (RecordKind::Set, Some(PathSegment::Index(index))) => {
                let appended = record.old.is_undefined() && *index >= grown_to;
                entries.push(Entry {
                    op: ArrayOp::set(*index, record.value.clone(), record.old.clone()),
                    appended,
                });
            }
            (RecordKind::Delete, Some(PathSegment::Index(index))) => {
                deletes += 1;
                entries.push(Entry::plain(ArrayOp::delete(*index, record.old.clone())));
            }
            _ => {}
        }
    }
    entries
}

/// Length of the write chain starting at `start` that ends in a write whose
/// old value is the value written at `start`, i.e. the element that was
/// shifted up. Between them there may be further shifts into fresh slots,
/// or a run of overwrites at consecutive indices.
fn find_corresponding_insert(entries: &[Entry], start: usize) -> Option<usize> {
    let start_index = entries[start].op.index;
    let start_value = &entries[start].op.value;
    let mut s = 0;
    // (position in `entries`, array index) of the first overwrite
    let mut overwrites: Option<(usize, usize)> = None;

    while start + s + 1 < entries.len() {
        let pos = start + s + 1;
        let next = &entries[pos].op;
        if next.is_write() && next.index < start_index && next.old == *start_value {
            return Some(s + 1);
        }
        match overwrites {
            None if next.is_write()
                && start_index.checked_sub(s + 1) == Some(next.index)
                && next.old.is_undefined() =>
            {
                s += 1;
            }
            None if next.kind == ArrayOpKind::Set && !next.old.is_undefined() => {
                overwrites = Some((pos, next.index));
                s += 1;
            }
            Some((at, index))
                if next.kind == ArrayOpKind::Set
                    && next.index == index + (pos - at)
                    && !next.old.is_undefined() =>
            {
                s += 1;
            }
            _ => return None,
        }
    }
    None
}

/// Number of deletes directly after `start` at descending indices.
fn find_continuous_delete(entries: &[Entry], start: usize) -> usize {
    let start_index = entries[start].op.index;
    let mut d = 0;
    while let Some(next) = entries.get(start + d + 1) {
        if next.op.kind == ArrayOpKind::Delete && start_index.checked_sub(d + 1) == Some(next.op.index) {
            d += 1;
        } else {
            break;
        }
    }
    d
}

fn collapse(mut entries: Vec<Entry>) -> Vec<ArrayOp> {
    let mut i = 0;
    while i < entries.len() {
        let kind = entries[i].op.kind;
        if entries[i].op.is_write() && entries[i].op.old.is_undefined() {
            match find_corresponding_insert(&entries, i) {
                Some(s) => {
                    let end = &entries[i + s].op;
                    let insert = ArrayOp::insert(end.index, end.value.clone());
                    entries[i + s] = Entry::plain(insert);
                    entries.remove(i);
                }
                None => i += 1,
            }
        } else if i > 0 && kind == ArrayOpKind::Delete {
            let start_index = entries[i].op.index;
            let d = find_continuous_delete(&entries, i);
            let prev = &entries[i - 1].op;
            let shifted_down = prev.kind == ArrayOpKind::Set
                && start_index.checked_sub(d + 1) == Some(prev.index)
                && prev.value == entries[i].op.value;
            if shifted_down {
                let delete = ArrayOp::delete(prev.index, prev.old.clone());
                entries.drain(i - 1..=i);
                entries.insert(i - 1 + d, Entry::plain(delete));
                i -= 1;
            } else {
                i += 1;
            }
        } else {
            i += 1;
        }
    }

    entries
        .into_iter()
        .map(|entry| match entry.op.kind {
            ArrayOpKind::Set if entry.appended => ArrayOp::insert(entry.op.index, entry.op.value),
            _ => entry.op,
        })
        .collect()
}
