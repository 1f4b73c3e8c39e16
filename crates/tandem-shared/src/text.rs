//! Shared text.

use crate::doc::Doc;
use crate::error::{Result, SharedError};
use crate::event::{Callback, Event, ObserverHandle, TransactionInfo};
use crate::handle::{Handle, PrelimBody, Target};
use crate::id::{ContainerId, ContainerKind};
use std::fmt;
use std::sync::Arc;

/// Collaborative text: a character sequence with the same merge rules as
/// [`crate::SharedArray`].
#[derive(Clone)]
pub struct SharedText {
    handle: Handle,
}

impl SharedText {
    pub fn new(initial: &str) -> Self {
        Self {
            handle: Handle::prelim(ContainerKind::Text, PrelimBody::Text(initial.to_string())),
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

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.to_string().chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, index: usize, text: &str) -> Result<()> {
        match self.handle.target() {
            Target::Doc(doc) => doc.mutate(|state, inner| state.text_insert(inner, self.id(), index, text)),
            Target::Prelim => self
                .handle
                .write_prelim(|body| match body {
                    PrelimBody::Text(s) => {
                        let length = s.chars().count();
                        if index > length {
                            return Err(SharedError::IndexOutOfBounds { index, length });
                        }
                        let at = s.char_indices().nth(index).map_or(s.len(), |(i, _)| i);
                        s.insert_str(at, text);
                        Ok(())
                    }
                    _ => Ok(()),
                })
                .unwrap_or(Ok(())),
            Target::Dropped => Err(SharedError::DocumentDropped),
        }
    }

    /// Remove `len` characters starting at `index`.
    pub fn delete(&self, index: usize, len: usize) -> Result<()> {
        match self.handle.target() {
            Target::Doc(doc) => doc.mutate(|state, _| state.list_delete(self.id(), index, len)),
            Target::Prelim => self
                .handle
                .write_prelim(|body| match body {
                    PrelimBody::Text(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        if index + len > chars.len() {
                            return Err(SharedError::IndexOutOfBounds {
                                index: index + len,
                                length: chars.len(),
                            });
                        }
                        *s = chars[..index].iter().chain(&chars[index + len..]).collect();
                        Ok(())
                    }
                    _ => Ok(()),
                })
                .unwrap_or(Ok(())),
            Target::Dropped => Err(SharedError::DocumentDropped),
        }
    }

    pub fn observe<F>(&self, f: F) -> ObserverHandle
    where
        F: Fn(&Event, &TransactionInfo) + Send + Sync + 'static,
    {
        self.handle.observe(Callback::Shallow(Arc::new(f)))
    }
}

impl fmt::Display for SharedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self.handle.target() {
            Target::Doc(doc) => doc.read(|state| state.text(self.id())),
            Target::Prelim => self
                .handle
                .read_prelim(|body| match body {
                    PrelimBody::Text(s) => s.clone(),
                    _ => String::new(),
                })
                .unwrap_or_default(),
            Target::Dropped => String::new(),
        };
        f.write_str(&text)
    }
}

impl PartialEq for SharedText {
    fn eq(&self, other: &Self) -> bool {
        self.handle.id == other.handle.id
    }
}

impl fmt::Debug for SharedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedText({}){:?}", self.id(), self.to_string())
    }
}
