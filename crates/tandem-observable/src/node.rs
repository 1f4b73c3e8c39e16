//! Shared container internals: identity, parent edges and record fan-out.

use crate::record::{PathSegment, Record};
use crate::scheduler::Subscriber;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an observable container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

pub(crate) enum Body {
    Map(BTreeMap<String, Value>),
    /// `None` marks a hole.
    Array(Vec<Option<Value>>),
}

struct ParentEdge {
    parent: Weak<Node>,
    segment: PathSegment,
}

pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) body: RwLock<Body>,
    parents: Mutex<Vec<ParentEdge>>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl Node {
    pub(crate) fn new(body: Body) -> Arc<Node> {
        Arc::new(Node {
            id: NodeId::next(),
            body: RwLock::new(body),
            parents: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn add_subscriber(&self, subscriber: Arc<Subscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    pub(crate) fn remove_subscriber(&self, subscriber: &Arc<Subscriber>) {
        self.subscribers
            .lock()
            .retain(|s| !Arc::ptr_eq(s, subscriber));
    }

    /// Queue `record` for every subscriber of this node and its ancestors.
    pub(crate) fn notify(&self, record: Record) {
        let subscribers = self.subscribers.lock().clone();
        for subscriber in subscribers {
            subscriber.push(record.clone());
        }

        let parents: Vec<(Arc<Node>, PathSegment)> = self
            .parents
            .lock()
            .iter()
            .filter_map(|edge| edge.parent.upgrade().map(|p| (p, edge.segment.clone())))
            .collect();
        for (parent, segment) in parents {
            parent.notify(record.prefixed(segment));
        }
    }
}

fn child_node(value: &Value) -> Option<&Arc<Node>> {
    match value {
        Value::Map(m) => Some(m.node()),
        Value::Array(a) => Some(a.node()),
        _ => None,
    }
}

/// Record that `child` now lives in `parent` at `segment`.
pub(crate) fn attach(child: &Value, parent: &Arc<Node>, segment: PathSegment) {
    if let Some(node) = child_node(child) {
        node.parents.lock().push(ParentEdge {
            parent: Arc::downgrade(parent),
            segment,
        });
    }
}

/// Drop one `parent`/`segment` edge of `child`, if present.
pub(crate) fn detach(child: &Value, parent: &Arc<Node>, segment: &PathSegment) {
    if let Some(node) = child_node(child) {
        let mut parents = node.parents.lock();
        let target = Arc::downgrade(parent);
        if let Some(pos) = parents
            .iter()
            .position(|e| e.parent.ptr_eq(&target) && &e.segment == segment)
        {
            parents.remove(pos);
        }
    }
}
