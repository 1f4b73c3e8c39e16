//! Change events and observer registration.

use crate::handle::Link;
use crate::id::{ContainerId, Origin};
use crate::value::SharedValue;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One step from an observed container down to a changed descendant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAction {
    Add,
    Update,
    Delete,
}

/// How one map key changed during a transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyChange {
    pub action: KeyAction,
    /// Value before the transaction, for updates and deletes.
    pub old: Option<SharedValue>,
}

/// A run-length segment of a list change.
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    Retain(usize),
    Insert(Vec<SharedValue>),
    Delete(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    Map(BTreeMap<String, KeyChange>),
    Array(Vec<Delta>),
    /// Inserted text arrives as single-character strings.
    Text(Vec<Delta>),
}

/// Changes made to one container by one transaction.
#[derive(Clone, Debug)]
pub struct Event {
    /// The changed container.
    pub target: ContainerId,
    /// Path from the observing container to `target`; empty for shallow
    /// observers.
    pub path: Vec<PathSegment>,
    pub change: Change,
}

/// Context of the transaction that produced a batch of events.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionInfo {
    pub origin: Option<Origin>,
    /// False when the transaction applied a remote update.
    pub local: bool,
}

pub(crate) type ShallowFn = Arc<dyn Fn(&Event, &TransactionInfo) + Send + Sync>;
pub(crate) type DeepFn = Arc<dyn Fn(&[Event], &TransactionInfo) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Callback {
    Shallow(ShallowFn),
    Deep(DeepFn),
}

#[derive(Clone)]
pub(crate) struct Observer {
    pub(crate) id: u64,
    pub(crate) callback: Callback,
}

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

impl Observer {
    pub(crate) fn new(callback: Callback) -> Self {
        Self {
            id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
            callback,
        }
    }
}

/// Observers of attached containers, keyed by container.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    by_container: HashMap<ContainerId, Vec<Observer>>,
}

impl ObserverRegistry {
    pub(crate) fn add(&mut self, container: &ContainerId, observer: Observer) {
        self.by_container
            .entry(container.clone())
            .or_default()
            .push(observer);
    }

    pub(crate) fn adopt(&mut self, container: &ContainerId, observers: Vec<Observer>) {
        if observers.is_empty() {
            return;
        }
        self.by_container
            .entry(container.clone())
            .or_default()
            .extend(observers);
    }

    pub(crate) fn remove(&mut self, container: &ContainerId, id: u64) {
        if let Some(list) = self.by_container.get_mut(container) {
            list.retain(|o| o.id != id);
            if list.is_empty() {
                self.by_container.remove(container);
            }
        }
    }

    pub(crate) fn get(&self, container: &ContainerId) -> &[Observer] {
        self.by_container
            .get(container)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Returned by `observe`/`observe_deep`; dropping it keeps the observer.
pub struct ObserverHandle {
    pub(crate) id: u64,
    pub(crate) container: ContainerId,
    pub(crate) link: Arc<RwLock<Link>>,
}

impl ObserverHandle {
    /// Remove the observer. Idempotent.
    pub fn unobserve(&self) {
        let doc = {
            let mut link = self.link.write();
            match &mut *link {
                Link::Prelim(prelim) => {
                    prelim.observers.retain(|o| o.id != self.id);
                    None
                }
                Link::Attached(doc) => doc.upgrade(),
            }
        };
        if let Some(doc) = doc {
            doc.observers.lock().remove(&self.container, self.id);
        }
    }
}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("container", &self.container)
            .finish()
    }
}
