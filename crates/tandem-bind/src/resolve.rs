//! Path resolution: find the node pair a shared event or an observable
//! record refers to.

use tandem_observable::{NodeId, ObservableArray, ObservableMap, Value};
use tandem_shared::{ContainerId, PathSegment, SharedArray, SharedMap, SharedValue};

/// An observable container and the shared container it mirrors.
#[derive(Clone, Debug)]
pub enum NodePair {
    Map {
        observable: ObservableMap,
        shared: SharedMap,
    },
    Array {
        observable: ObservableArray,
        shared: SharedArray,
    },
}

impl NodePair {
    /// Pair two values when both are containers of the same kind.
    pub fn new(observable: &Value, shared: &SharedValue) -> Option<NodePair> {
        match (observable, shared) {
            (Value::Map(observable), SharedValue::Map(shared)) => Some(NodePair::Map {
                observable: observable.clone(),
                shared: shared.clone(),
            }),
            (Value::Array(observable), SharedValue::Array(shared)) => Some(NodePair::Array {
                observable: observable.clone(),
                shared: shared.clone(),
            }),
            _ => None,
        }
    }

    pub fn observable_id(&self) -> NodeId {
        match self {
            NodePair::Map { observable, .. } => observable.id(),
            NodePair::Array { observable, .. } => observable.id(),
        }
    }

    pub fn shared_id(&self) -> &ContainerId {
        match self {
            NodePair::Map { shared, .. } => shared.id(),
            NodePair::Array { shared, .. } => shared.id(),
        }
    }

    pub fn observable_json(&self) -> serde_json::Value {
        match self {
            NodePair::Map { observable, .. } => observable.to_json(),
            NodePair::Array { observable, .. } => observable.to_json(),
        }
    }

    pub fn shared_json(&self) -> serde_json::Value {
        match self {
            NodePair::Map { shared, .. } => shared.to_json(),
            NodePair::Array { shared, .. } => shared.to_json(),
        }
    }

    /// Child pairs at matching keys or indices.
    pub fn children(&self) -> Vec<NodePair> {
        match self {
            NodePair::Map { observable, shared } => observable
                .entries()
                .into_iter()
                .filter(|(_, value)| value.is_container())
                .filter_map(|(key, value)| NodePair::new(&value, &shared.get(&key)?))
                .collect(),
            NodePair::Array { observable, shared } => observable
                .to_vec()
                .iter()
                .zip(shared.to_vec())
                .filter_map(|(value, current)| NodePair::new(value, &current))
                .collect(),
        }
    }

    /// Step one segment down on both sides.
    fn child(&self, segment: &PathSegment) -> Option<NodePair> {
        let (observable, shared) = match (self, segment) {
            (NodePair::Map { observable, shared }, PathSegment::Key(key)) => {
                (observable.get(key), shared.get(key)?)
            }
            (NodePair::Array { observable, shared }, PathSegment::Index(index)) => {
                (observable.get(*index), shared.get(*index)?)
            }
            _ => return None,
        };
        NodePair::new(&observable, &shared)
    }
}

/// Walk both trees from `root` along `path`.
///
/// Returns `None` when the observable side has already been vacated (a
/// local delete raced the event) or the two sides no longer have the same
/// shape; callers treat that as nothing to do.
pub fn resolve(root: &NodePair, path: &[PathSegment]) -> Option<NodePair> {
    let mut current = root.clone();
    for segment in path {
        current = current.child(segment)?;
    }
    Some(current)
}

/// Translate an observable record path. `None` for paths through an
/// array's `length`.
pub fn shared_path(path: &[tandem_observable::PathSegment]) -> Option<Vec<PathSegment>> {
    path.iter()
        .map(|segment| match segment {
            tandem_observable::PathSegment::Key(key) => Some(PathSegment::Key(key.clone())),
            tandem_observable::PathSegment::Index(index) => Some(PathSegment::Index(*index)),
            tandem_observable::PathSegment::Length => None,
        })
        .collect()
}

/// Depth-first search for the pair whose observable side is `target`,
/// entering only pairs accepted by `descend`.
pub fn find<F>(root: &NodePair, target: NodeId, descend: &F) -> Option<NodePair>
where
    F: Fn(&NodePair) -> bool,
{
    if root.observable_id() == target {
        return Some(root.clone());
    }
    root.children()
        .into_iter()
        .filter(|child| descend(child))
        .find_map(|child| find(&child, target, descend))
}
