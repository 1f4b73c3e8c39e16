//! Transaction bookkeeping.
//!
//! A transaction remembers, for each container it touches, what the
//! container looked like before the first change. Events are computed at
//! commit by comparing that snapshot with the final state.

use crate::id::{ContainerId, OpId, Origin};
use crate::op::Op;
use crate::value::Content;
use std::collections::{BTreeMap, HashMap, HashSet};

pub(crate) struct Transaction {
    pub(crate) origin: Option<Origin>,
    pub(crate) local: bool,
    /// Operations integrated by this transaction, in order.
    pub(crate) ops: Vec<Op>,
    /// Containers that came into existence during this transaction. Their
    /// content is reported through the event of the container they were
    /// inserted into.
    pub(crate) created: HashSet<ContainerId>,
    pub(crate) map_before: BTreeMap<ContainerId, HashMap<String, Option<Content>>>,
    pub(crate) list_before: BTreeMap<ContainerId, HashSet<OpId>>,
}

impl Transaction {
    pub(crate) fn new(origin: Option<Origin>, local: bool) -> Self {
        Self {
            origin,
            local,
            ops: Vec::new(),
            created: HashSet::new(),
            map_before: BTreeMap::new(),
            list_before: BTreeMap::new(),
        }
    }

    pub(crate) fn touch_map(
        &mut self,
        container: &ContainerId,
        key: &str,
        current: impl FnOnce() -> Option<Content>,
    ) {
        if self.created.contains(container) {
            return;
        }
        let keys = self.map_before.entry(container.clone()).or_default();
        if !keys.contains_key(key) {
            keys.insert(key.to_string(), current());
        }
    }

    pub(crate) fn touch_list(
        &mut self,
        container: &ContainerId,
        visible: impl FnOnce() -> HashSet<OpId>,
    ) {
        if self.created.contains(container) || self.list_before.contains_key(container) {
            return;
        }
        self.list_before.insert(container.clone(), visible());
    }
}
