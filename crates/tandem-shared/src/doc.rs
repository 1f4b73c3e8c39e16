//! Documents: roots, transactions, observers and update exchange.

use crate::array::SharedArray;
use crate::error::Result;
use crate::event::{Callback, Event, ObserverRegistry, TransactionInfo};
use crate::handle::Handle;
use crate::id::{ClientId, ContainerId, ContainerKind, Origin};
use crate::map::SharedMap;
use crate::op::{decode_update, encode_update};
use crate::store::DocState;
use crate::text::SharedText;
use crate::txn::Transaction;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use ulid::Ulid;

pub(crate) type UpdateFn = Arc<dyn Fn(&[u8], Option<&Origin>) + Send + Sync>;

pub(crate) struct DocInner {
    client: ClientId,
    pub(crate) state: Mutex<DocState>,
    pub(crate) observers: Mutex<ObserverRegistry>,
    update_listeners: Mutex<Vec<(u64, UpdateFn)>>,
    next_listener: AtomicU64,
}

impl DocInner {
    pub(crate) fn read<R>(&self, f: impl FnOnce(&DocState) -> R) -> R {
        f(&*self.state.lock())
    }

    /// Run `f` inside the open transaction, or inside a fresh one that is
    /// committed before returning.
    pub(crate) fn mutate<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut DocState, &Arc<DocInner>) -> Result<R>,
    ) -> Result<R> {
        let (result, implicit) = {
            let mut state = self.state.lock();
            let implicit = state.txn.is_none();
            if implicit {
                state.txn = Some(Transaction::new(None, true));
            }
            (f(&mut *state, self), implicit)
        };
        if implicit {
            self.commit();
        }
        result
    }

    fn begin(&self, origin: Option<Origin>, local: bool) -> bool {
        let mut state = self.state.lock();
        if state.txn.is_some() {
            return false;
        }
        state.txn = Some(Transaction::new(origin, local));
        true
    }

    /// Close the open transaction, then notify observers and update
    /// listeners with no lock held.
    fn commit(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let (info, shallow, deep, update) = {
            let mut state = self.state.lock();
            let Some(txn) = state.txn.take() else {
                return;
            };
            let info = TransactionInfo {
                origin: txn.origin.clone(),
                local: txn.local,
            };
            let changes = state.changes(&txn, &weak);

            let registry = self.observers.lock();
            let mut shallow = Vec::new();
            let mut deep: Vec<(u64, crate::event::DeepFn, Vec<Event>)> = Vec::new();
            for (target, change) in changes {
                for (ancestor, path) in state.ancestry(&target) {
                    for observer in registry.get(&ancestor) {
                        match &observer.callback {
                            Callback::Shallow(f) if ancestor == target => {
                                shallow.push((
                                    Arc::clone(f),
                                    Event {
                                        target: target.clone(),
                                        path: Vec::new(),
                                        change: change.clone(),
                                    },
                                ));
                            }
                            Callback::Deep(f) => {
                                let event = Event {
                                    target: target.clone(),
                                    path: path.clone(),
                                    change: change.clone(),
                                };
                                match deep.iter_mut().find(|(id, _, _)| *id == observer.id) {
                                    Some((_, _, events)) => events.push(event),
                                    None => deep.push((observer.id, Arc::clone(f), vec![event])),
                                }
                            }
                            Callback::Shallow(_) => {}
                        }
                    }
                }
            }

            let update = if txn.ops.is_empty() {
                None
            } else {
                Some(encode_update(&txn.ops))
            };
            (info, shallow, deep, update)
        };

        for (f, event) in shallow {
            f(&event, &info);
        }
        for (_, f, mut events) in deep {
            events.sort_by_key(|e| e.path.len());
            f(&events, &info);
        }
        if let Some(bytes) = update {
            let listeners: Vec<UpdateFn> = self
                .update_listeners
                .lock()
                .iter()
                .map(|(_, f)| Arc::clone(f))
                .collect();
            for listener in listeners {
                listener(&bytes, info.origin.as_ref());
            }
        }
    }
}

/// A replicated document holding named root containers.
///
/// Cloning yields another handle to the same document.
#[derive(Clone)]
pub struct Doc {
    inner: Arc<DocInner>,
}

impl Doc {
    /// Create a document with a random client id.
    pub fn new() -> Self {
        let client = (Ulid::new().random() & u64::MAX as u128) as u64;
        Self::with_client_id(client)
    }

    pub fn with_client_id(client: ClientId) -> Self {
        Self {
            inner: Arc::new(DocInner {
                client,
                state: Mutex::new(DocState::new(client)),
                observers: Mutex::new(ObserverRegistry::default()),
                update_listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<DocInner>) -> Self {
        Self { inner }
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.client
    }

    fn root(&self, name: &str, kind: ContainerKind) -> Handle {
        self.inner.state.lock().ensure_root(name, kind);
        Handle::attached(
            ContainerId::Root(name.to_string()),
            kind,
            Arc::downgrade(&self.inner),
        )
    }

    /// The root map called `name`, created on first use.
    pub fn get_map(&self, name: &str) -> SharedMap {
        SharedMap::from_handle(self.root(name, ContainerKind::Map))
    }

    pub fn get_array(&self, name: &str) -> SharedArray {
        SharedArray::from_handle(self.root(name, ContainerKind::Array))
    }

    pub fn get_text(&self, name: &str) -> SharedText {
        SharedText::from_handle(self.root(name, ContainerKind::Text))
    }

    /// Run `f` as one transaction tagged with `origin`. Writes made by `f`
    /// produce a single round of events and at most one update. Nested calls
    /// join the outer transaction and keep its origin.
    pub fn transact<R>(&self, origin: Option<Origin>, f: impl FnOnce() -> R) -> R {
        let outermost = self.inner.begin(origin, true);
        let result = f();
        if outermost {
            self.inner.commit();
        }
        result
    }

    /// Origin of the open transaction, if any.
    pub fn current_origin(&self) -> Option<Origin> {
        self.inner
            .state
            .lock()
            .txn
            .as_ref()
            .and_then(|t| t.origin.clone())
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.state.lock().txn.is_some()
    }

    /// Listen for the encoded operations of every transaction that changed
    /// the document, local or remote.
    pub fn on_update<F>(&self, listener: F) -> UpdateSubscription
    where
        F: Fn(&[u8], Option<&Origin>) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .update_listeners
            .lock()
            .push((id, Arc::new(listener)));
        UpdateSubscription {
            id,
            doc: Arc::downgrade(&self.inner),
        }
    }

    /// Merge an update produced by another replica.
    pub fn apply_update(&self, update: &[u8], origin: Option<Origin>) -> Result<()> {
        let ops = decode_update(update)?;
        let outermost = self.inner.begin(origin, false);
        self.inner.state.lock().receive(ops);
        if outermost {
            self.inner.commit();
        }
        Ok(())
    }

    /// Everything this replica has integrated, as one update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        encode_update(self.inner.read(|state| state.log().to_vec()).as_slice())
    }

    /// Number of remote operations waiting for missing dependencies.
    pub fn pending_ops(&self) -> usize {
        self.inner.read(|state| state.pending_len())
    }

    pub fn ptr_eq(&self, other: &Doc) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Doc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doc")
            .field("client", &self.inner.client)
            .finish()
    }
}

/// `applyUpdate(doc, bytes, origin)`.
pub fn apply_update(doc: &Doc, update: &[u8], origin: Option<Origin>) -> Result<()> {
    doc.apply_update(update, origin)
}

/// Returned by [`Doc::on_update`].
pub struct UpdateSubscription {
    id: u64,
    doc: Weak<DocInner>,
}

impl UpdateSubscription {
    pub fn unsubscribe(&self) {
        if let Some(doc) = self.doc.upgrade() {
            doc.update_listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}
