//! Container handles and the detached ("preliminary") state.
//!
//! A handle created with `SharedMap::new()` and friends holds its content
//! locally until it is written into an attached container. Integration moves
//! the content into the document and flips the shared link, so every clone of
//! the handle starts reading from the document.

use crate::doc::{Doc, DocInner};
use crate::error::{Result, SharedError};
use crate::event::{Callback, Observer, ObserverHandle};
use crate::id::{ContainerId, ContainerKind};
use crate::value::SharedValue;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

pub(crate) enum PrelimBody {
    Map(BTreeMap<String, SharedValue>),
    List(Vec<SharedValue>),
    Text(String),
}

pub(crate) struct Prelim {
    pub(crate) body: PrelimBody,
    pub(crate) observers: Vec<Observer>,
}

pub(crate) enum Link {
    Prelim(Prelim),
    Attached(Weak<DocInner>),
}

/// Where operations on a handle go.
pub(crate) enum Target {
    Prelim,
    Doc(Arc<DocInner>),
    Dropped,
}

#[derive(Clone)]
pub(crate) struct Handle {
    pub(crate) id: ContainerId,
    pub(crate) kind: ContainerKind,
    pub(crate) link: Arc<RwLock<Link>>,
}

impl Handle {
    pub(crate) fn prelim(kind: ContainerKind, body: PrelimBody) -> Self {
        Self {
            id: ContainerId::fresh(),
            kind,
            link: Arc::new(RwLock::new(Link::Prelim(Prelim {
                body,
                observers: Vec::new(),
            }))),
        }
    }

    pub(crate) fn attached(id: ContainerId, kind: ContainerKind, doc: Weak<DocInner>) -> Self {
        Self {
            id,
            kind,
            link: Arc::new(RwLock::new(Link::Attached(doc))),
        }
    }

    pub(crate) fn target(&self) -> Target {
        match &*self.link.read() {
            Link::Prelim(_) => Target::Prelim,
            Link::Attached(doc) => match doc.upgrade() {
                Some(doc) => Target::Doc(doc),
                None => Target::Dropped,
            },
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        matches!(&*self.link.read(), Link::Attached(_))
    }

    pub(crate) fn doc(&self) -> Option<Doc> {
        match self.target() {
            Target::Doc(inner) => Some(Doc::from_inner(inner)),
            _ => None,
        }
    }

    pub(crate) fn read_prelim<R>(&self, f: impl FnOnce(&PrelimBody) -> R) -> Option<R> {
        match &*self.link.read() {
            Link::Prelim(prelim) => Some(f(&prelim.body)),
            Link::Attached(_) => None,
        }
    }

    pub(crate) fn write_prelim<R>(&self, f: impl FnOnce(&mut PrelimBody) -> R) -> Option<R> {
        match &mut *self.link.write() {
            Link::Prelim(prelim) => Some(f(&mut prelim.body)),
            Link::Attached(_) => None,
        }
    }

    /// Take the detached content and point the handle at `doc`.
    pub(crate) fn adopt(&self, doc: &Arc<DocInner>) -> Result<Prelim> {
        let mut link = self.link.write();
        match &*link {
            Link::Attached(_) => Err(SharedError::AlreadyIntegrated(self.id.clone())),
            Link::Prelim(_) => {
                let previous = std::mem::replace(&mut *link, Link::Attached(Arc::downgrade(doc)));
                match previous {
                    Link::Prelim(prelim) => Ok(prelim),
                    Link::Attached(_) => Err(SharedError::AlreadyIntegrated(self.id.clone())),
                }
            }
        }
    }

    pub(crate) fn observe(&self, callback: Callback) -> ObserverHandle {
        let observer = Observer::new(callback);
        let id = observer.id;
        let doc = {
            let mut link = self.link.write();
            match &mut *link {
                Link::Prelim(prelim) => {
                    prelim.observers.push(observer.clone());
                    None
                }
                Link::Attached(doc) => doc.upgrade(),
            }
        };
        if let Some(doc) = doc {
            doc.observers.lock().add(&self.id, observer);
        }
        ObserverHandle {
            id,
            container: self.id.clone(),
            link: Arc::clone(&self.link),
        }
    }
}

/// Reject containers that already live in a document before storing them
/// in a detached container.
pub(crate) fn check_detached(value: &SharedValue) -> Result<()> {
    match value.handle() {
        Some(handle) if handle.is_attached() => {
            Err(SharedError::AlreadyIntegrated(handle.id.clone()))
        }
        _ => Ok(()),
    }
}
