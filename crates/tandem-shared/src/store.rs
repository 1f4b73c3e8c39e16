//! Document state: containers, operation integration and reads.
//!
//! Maps are last-writer-wins registers per key. Lists are RGA sequences
//! kept as a flat vector in document order: an element is placed right
//! after its origin, skipping any elements with a greater id, which yields
//! the same order on every replica regardless of delivery order. Deleted
//! elements stay as tombstones so later inserts can still find their origin.

use crate::doc::DocInner;
use crate::error::{Result, SharedError};
use crate::event::{Change, Delta, KeyAction, KeyChange, PathSegment};
use crate::handle::{Prelim, PrelimBody};
use crate::id::{ClientId, ContainerId, ContainerKind, OpId};
use crate::op::{Action, Op};
use crate::txn::Transaction;
use crate::value::{Content, SharedValue};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};

/// Where a nested container lives inside its parent.
#[derive(Clone, Debug)]
enum Slot {
    Key(String),
    /// The list element that holds the container.
    Element(OpId),
}

#[derive(Clone, Debug)]
struct Parent {
    container: ContainerId,
    slot: Slot,
}

#[derive(Clone, Debug)]
struct MapEntry {
    id: OpId,
    /// `None` once deleted.
    content: Option<Content>,
}

#[derive(Clone, Debug)]
struct Element {
    id: OpId,
    content: Content,
    deleted: bool,
}

#[derive(Debug)]
enum Body {
    Map(BTreeMap<String, MapEntry>),
    List(Vec<Element>),
}

#[derive(Debug)]
struct Container {
    kind: ContainerKind,
    parent: Option<Parent>,
    body: Body,
}

impl Container {
    fn new(kind: ContainerKind, parent: Option<Parent>) -> Self {
        let body = match kind {
            ContainerKind::Map => Body::Map(BTreeMap::new()),
            ContainerKind::Array | ContainerKind::Text => Body::List(Vec::new()),
        };
        Self { kind, parent, body }
    }

    fn map_content(&self, key: &str) -> Option<Content> {
        match &self.body {
            Body::Map(fields) => fields.get(key).and_then(|e| e.content.clone()),
            Body::List(_) => None,
        }
    }

    fn visible(&self) -> impl Iterator<Item = &Element> {
        let elements: &[Element] = match &self.body {
            Body::List(elements) => elements,
            Body::Map(_) => &[],
        };
        elements.iter().filter(|e| !e.deleted)
    }

    fn visible_ids(&self) -> HashSet<OpId> {
        self.visible().map(|e| e.id).collect()
    }

    fn position(&self, id: &OpId) -> Option<usize> {
        match &self.body {
            Body::List(elements) => elements.iter().position(|e| e.id == *id),
            Body::Map(_) => None,
        }
    }
}

/// A detached container taken over by the document, waiting to have its
/// content replayed as operations.
struct Adopted {
    id: ContainerId,
    prelim: Prelim,
}

pub(crate) struct DocState {
    client: ClientId,
    clock: u64,
    containers: HashMap<ContainerId, Container>,
    seen: HashSet<OpId>,
    /// Integrated operations in integration order.
    log: Vec<Op>,
    /// Remote operations whose dependencies have not arrived yet.
    pending: Vec<Op>,
    pub(crate) txn: Option<Transaction>,
}

impl DocState {
    pub(crate) fn new(client: ClientId) -> Self {
        Self {
            client,
            clock: 0,
            containers: HashMap::new(),
            seen: HashSet::new(),
            log: Vec::new(),
            pending: Vec::new(),
            txn: None,
        }
    }

    pub(crate) fn log(&self) -> &[Op] {
        &self.log
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Create a root container if missing. A list root can switch between
    /// array and text, since remote operations alone cannot tell them apart.
    pub(crate) fn ensure_root(&mut self, name: &str, kind: ContainerKind) {
        let id = ContainerId::Root(name.to_string());
        match self.containers.get_mut(&id) {
            Some(container) => {
                if container.kind != kind && container.kind.is_list() && kind.is_list() {
                    container.kind = kind;
                }
            }
            None => {
                self.containers.insert(id, Container::new(kind, None));
            }
        }
    }

    pub(crate) fn kind(&self, id: &ContainerId) -> Option<ContainerKind> {
        self.containers.get(id).map(|c| c.kind)
    }

    fn container_of(&self, id: &ContainerId, expected: ContainerKind) -> Result<&Container> {
        let container = self
            .containers
            .get(id)
            .ok_or_else(|| SharedError::ContainerNotFound(id.clone()))?;
        let compatible = container.kind == expected || (container.kind.is_list() && expected.is_list());
        if !compatible {
            return Err(SharedError::TypeMismatch {
                expected,
                found: container.kind,
            });
        }
        Ok(container)
    }

    // ---- integration ----

    fn next_id(&mut self) -> OpId {
        self.clock += 1;
        OpId::new(self.clock, self.client)
    }

    fn local_op(&mut self, target: &ContainerId, action: Action) -> OpId {
        let id = self.next_id();
        self.integrate(Op {
            id,
            target: target.clone(),
            action,
        });
        id
    }

    fn create_container(&mut self, id: &ContainerId, kind: ContainerKind, parent: Parent) {
        if self.containers.contains_key(id) {
            return;
        }
        self.containers
            .insert(id.clone(), Container::new(kind, Some(parent)));
        if let Some(txn) = self.txn.as_mut() {
            txn.created.insert(id.clone());
        }
    }

    fn integrate(&mut self, op: Op) {
        self.clock = self.clock.max(op.id.clock);
        if let ContainerId::Root(name) = &op.target {
            if !self.containers.contains_key(&op.target) {
                let kind = match op.action {
                    Action::MapSet { .. } => ContainerKind::Map,
                    _ => ContainerKind::Array,
                };
                let name = name.clone();
                self.ensure_root(&name, kind);
            }
        }

        match &op.action {
            Action::MapSet { key, content } => self.integrate_map_set(&op, key, content.clone()),
            Action::ListInsert { origin, content } => {
                self.integrate_list_insert(&op, *origin, content.clone())
            }
            Action::ListDelete { element } => self.integrate_list_delete(&op, *element),
        }

        self.seen.insert(op.id);
        self.log.push(op.clone());
        if let Some(txn) = self.txn.as_mut() {
            txn.ops.push(op);
        }
    }

    fn integrate_map_set(&mut self, op: &Op, key: &str, content: Option<Content>) {
        let Some(container) = self.containers.get(&op.target) else {
            return;
        };
        if !matches!(container.body, Body::Map(_)) {
            tracing::warn!(container = %op.target, "map write on a list container ignored");
            return;
        }
        if let Some(txn) = self.txn.as_mut() {
            txn.touch_map(&op.target, key, || container.map_content(key));
        }

        if let Some(Content::Container(kind, id)) = &content {
            self.create_container(
                id,
                *kind,
                Parent {
                    container: op.target.clone(),
                    slot: Slot::Key(key.to_string()),
                },
            );
        }

        if let Some(Container {
            body: Body::Map(fields),
            ..
        }) = self.containers.get_mut(&op.target)
        {
            let wins = fields.get(key).map_or(true, |entry| op.id > entry.id);
            if wins {
                fields.insert(key.to_string(), MapEntry { id: op.id, content });
            }
        }
    }

    fn integrate_list_insert(&mut self, op: &Op, origin: Option<OpId>, content: Content) {
        let Some(container) = self.containers.get(&op.target) else {
            return;
        };
        if !matches!(container.body, Body::List(_)) {
            tracing::warn!(container = %op.target, "list insert on a map container ignored");
            return;
        }
        if let Some(txn) = self.txn.as_mut() {
            txn.touch_list(&op.target, || container.visible_ids());
        }

        if let Content::Container(kind, id) = &content {
            self.create_container(
                id,
                *kind,
                Parent {
                    container: op.target.clone(),
                    slot: Slot::Element(op.id),
                },
            );
        }

        if let Some(Container {
            body: Body::List(elements),
            ..
        }) = self.containers.get_mut(&op.target)
        {
            let mut index = match origin {
                None => 0,
                Some(origin) => match elements.iter().position(|e| e.id == origin) {
                    Some(pos) => pos + 1,
                    None => elements.len(),
                },
            };
            while index < elements.len() && elements[index].id > op.id {
                index += 1;
            }
            elements.insert(
                index,
                Element {
                    id: op.id,
                    content,
                    deleted: false,
                },
            );
        }
    }

    fn integrate_list_delete(&mut self, op: &Op, element: OpId) {
        let Some(container) = self.containers.get(&op.target) else {
            return;
        };
        if let Some(txn) = self.txn.as_mut() {
            txn.touch_list(&op.target, || container.visible_ids());
        }
        if let Some(Container {
            body: Body::List(elements),
            ..
        }) = self.containers.get_mut(&op.target)
        {
            if let Some(e) = elements.iter_mut().find(|e| e.id == element) {
                e.deleted = true;
            }
        }
    }

    /// Whether every operation `op` depends on has been integrated.
    fn is_ready(&self, op: &Op) -> bool {
        let Some(container) = self.containers.get(&op.target) else {
            return op.target.is_root()
                && matches!(
                    op.action,
                    Action::MapSet { .. } | Action::ListInsert { origin: None, .. }
                );
        };
        match &op.action {
            Action::MapSet { .. } => true,
            Action::ListInsert { origin, .. } => {
                origin.map_or(true, |o| container.position(&o).is_some())
            }
            Action::ListDelete { element } => container.position(element).is_some(),
        }
    }

    /// Integrate remote operations, parking those with missing dependencies.
    pub(crate) fn receive(&mut self, ops: Vec<Op>) {
        for op in ops {
            if self.seen.contains(&op.id) {
                continue;
            }
            if self.is_ready(&op) {
                self.integrate(op);
            } else {
                self.pending.push(op);
            }
        }

        loop {
            let parked = std::mem::take(&mut self.pending);
            let before = parked.len();
            for op in parked {
                if self.seen.contains(&op.id) {
                    continue;
                }
                if self.is_ready(&op) {
                    self.integrate(op);
                } else {
                    self.pending.push(op);
                }
            }
            if self.pending.is_empty() || self.pending.len() == before {
                break;
            }
        }
    }

    // ---- local writes ----

    fn prepare(&mut self, doc: &Arc<DocInner>, value: SharedValue) -> Result<(Content, Option<Adopted>)> {
        if let Some(any) = value.to_any() {
            return Ok((Content::Any(any), None));
        }
        let Some(handle) = value.handle() else {
            return Ok((Content::Any(crate::value::Any::Null), None));
        };
        let prelim = handle.adopt(doc)?;
        Ok((
            Content::Container(handle.kind, handle.id.clone()),
            Some(Adopted {
                id: handle.id.clone(),
                prelim,
            }),
        ))
    }

    fn fill(&mut self, doc: &Arc<DocInner>, adopted: Adopted) -> Result<()> {
        let Adopted { id, prelim } = adopted;
        match prelim.body {
            PrelimBody::Map(fields) => {
                for (key, value) in fields {
                    self.map_set(doc, &id, key, value)?;
                }
            }
            PrelimBody::List(items) => self.list_insert(doc, &id, 0, items)?,
            PrelimBody::Text(text) => self.text_insert(doc, &id, 0, &text)?,
        }
        doc.observers.lock().adopt(&id, prelim.observers);
        Ok(())
    }

    pub(crate) fn map_set(
        &mut self,
        doc: &Arc<DocInner>,
        target: &ContainerId,
        key: String,
        value: SharedValue,
    ) -> Result<()> {
        self.container_of(target, ContainerKind::Map)?;
        let (content, adopted) = self.prepare(doc, value)?;
        self.local_op(
            target,
            Action::MapSet {
                key,
                content: Some(content),
            },
        );
        if let Some(adopted) = adopted {
            self.fill(doc, adopted)?;
        }
        Ok(())
    }

    /// Deleting an absent key creates no operation.
    pub(crate) fn map_delete(&mut self, target: &ContainerId, key: &str) -> Result<()> {
        let container = self.container_of(target, ContainerKind::Map)?;
        if container.map_content(key).is_none() {
            return Ok(());
        }
        self.local_op(
            target,
            Action::MapSet {
                key: key.to_string(),
                content: None,
            },
        );
        Ok(())
    }

    pub(crate) fn list_insert(
        &mut self,
        doc: &Arc<DocInner>,
        target: &ContainerId,
        index: usize,
        values: Vec<SharedValue>,
    ) -> Result<()> {
        let container = self.container_of(target, ContainerKind::Array)?;
        let visible: Vec<OpId> = container.visible().map(|e| e.id).collect();
        if index > visible.len() {
            return Err(SharedError::IndexOutOfBounds {
                index,
                length: visible.len(),
            });
        }
        let mut origin = if index == 0 { None } else { Some(visible[index - 1]) };
        for value in values {
            let (content, adopted) = self.prepare(doc, value)?;
            let id = self.local_op(target, Action::ListInsert { origin, content });
            if let Some(adopted) = adopted {
                self.fill(doc, adopted)?;
            }
            origin = Some(id);
        }
        Ok(())
    }

    pub(crate) fn list_delete(&mut self, target: &ContainerId, index: usize, count: usize) -> Result<()> {
        let container = self.container_of(target, ContainerKind::Array)?;
        let visible: Vec<OpId> = container.visible().map(|e| e.id).collect();
        if index + count > visible.len() {
            return Err(SharedError::IndexOutOfBounds {
                index: index + count,
                length: visible.len(),
            });
        }
        for element in visible[index..index + count].iter().copied() {
            self.local_op(target, Action::ListDelete { element });
        }
        Ok(())
    }

    pub(crate) fn text_insert(
        &mut self,
        doc: &Arc<DocInner>,
        target: &ContainerId,
        index: usize,
        text: &str,
    ) -> Result<()> {
        let chars = text
            .chars()
            .map(|c| SharedValue::String(c.to_string()))
            .collect();
        self.list_insert(doc, target, index, chars)
    }

    // ---- reads ----

    pub(crate) fn map_get(&self, target: &ContainerId, key: &str, doc: &Weak<DocInner>) -> Option<SharedValue> {
        self.containers
            .get(target)?
            .map_content(key)
            .map(|c| c.to_value(doc))
    }

    pub(crate) fn map_entries(&self, target: &ContainerId, doc: &Weak<DocInner>) -> Vec<(String, SharedValue)> {
        match self.containers.get(target).map(|c| &c.body) {
            Some(Body::Map(fields)) => fields
                .iter()
                .filter_map(|(k, e)| e.content.as_ref().map(|c| (k.clone(), c.to_value(doc))))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn map_keys(&self, target: &ContainerId) -> Vec<String> {
        match self.containers.get(target).map(|c| &c.body) {
            Some(Body::Map(fields)) => fields
                .iter()
                .filter(|(_, e)| e.content.is_some())
                .map(|(k, _)| k.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn list_values(&self, target: &ContainerId, doc: &Weak<DocInner>) -> Vec<SharedValue> {
        match self.containers.get(target) {
            Some(container) => container.visible().map(|e| e.content.to_value(doc)).collect(),
            None => Vec::new(),
        }
    }

    pub(crate) fn list_get(&self, target: &ContainerId, index: usize, doc: &Weak<DocInner>) -> Option<SharedValue> {
        self.containers
            .get(target)?
            .visible()
            .nth(index)
            .map(|e| e.content.to_value(doc))
    }

    pub(crate) fn list_len(&self, target: &ContainerId) -> usize {
        self.containers
            .get(target)
            .map_or(0, |c| c.visible().count())
    }

    pub(crate) fn text(&self, target: &ContainerId) -> String {
        let Some(container) = self.containers.get(target) else {
            return String::new();
        };
        container
            .visible()
            .filter_map(|e| match &e.content {
                Content::Any(crate::value::Any::String(s)) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn to_json(&self, target: &ContainerId) -> serde_json::Value {
        let Some(container) = self.containers.get(target) else {
            return serde_json::Value::Null;
        };
        match (&container.body, container.kind) {
            (Body::Map(fields), _) => {
                let mut object = serde_json::Map::new();
                for (key, entry) in fields {
                    if let Some(content) = &entry.content {
                        object.insert(key.clone(), self.content_json(content));
                    }
                }
                serde_json::Value::Object(object)
            }
            (Body::List(_), ContainerKind::Text) => serde_json::Value::String(self.text(target)),
            (Body::List(_), _) => serde_json::Value::Array(
                container
                    .visible()
                    .map(|e| self.content_json(&e.content))
                    .collect(),
            ),
        }
    }

    fn content_json(&self, content: &Content) -> serde_json::Value {
        match content {
            Content::Container(_, id) => self.to_json(id),
            Content::Any(any) => {
                let value = Content::Any(any.clone()).to_value(&Weak::new());
                value.to_json()
            }
        }
    }

    // ---- events ----

    /// Position of `child` inside its parent, if it is still reachable there.
    fn segment_of(&self, child: &ContainerId, parent: &Parent) -> Option<PathSegment> {
        let container = self.containers.get(&parent.container)?;
        match &parent.slot {
            Slot::Key(key) => {
                let content = container.map_content(key)?;
                (content.container_id() == Some(child)).then(|| PathSegment::Key(key.clone()))
            }
            Slot::Element(element) => container
                .visible()
                .position(|e| e.id == *element)
                .map(PathSegment::Index),
        }
    }

    /// `target` and each reachable ancestor, with the path from that
    /// ancestor down to `target`.
    pub(crate) fn ancestry(&self, target: &ContainerId) -> Vec<(ContainerId, Vec<PathSegment>)> {
        let mut chain = vec![(target.clone(), Vec::new())];
        let mut path: Vec<PathSegment> = Vec::new();
        let mut current = target.clone();
        while let Some(parent) = self.containers.get(&current).and_then(|c| c.parent.clone()) {
            let Some(segment) = self.segment_of(&current, &parent) else {
                break;
            };
            path.insert(0, segment);
            chain.push((parent.container.clone(), path.clone()));
            current = parent.container;
        }
        chain
    }

    /// Compare the transaction's snapshots with the current state.
    pub(crate) fn changes(&self, txn: &Transaction, doc: &Weak<DocInner>) -> Vec<(ContainerId, Change)> {
        let mut out = Vec::new();

        for (id, keys) in &txn.map_before {
            if txn.created.contains(id) {
                continue;
            }
            let Some(container) = self.containers.get(id) else {
                continue;
            };
            let mut changed = BTreeMap::new();
            for (key, before) in keys {
                let after = container.map_content(key);
                let change = match (before, &after) {
                    (None, None) => None,
                    (None, Some(_)) => Some(KeyChange {
                        action: KeyAction::Add,
                        old: None,
                    }),
                    (Some(old), None) => Some(KeyChange {
                        action: KeyAction::Delete,
                        old: Some(old.to_value(doc)),
                    }),
                    (Some(old), Some(new)) if old != new => Some(KeyChange {
                        action: KeyAction::Update,
                        old: Some(old.to_value(doc)),
                    }),
                    _ => None,
                };
                if let Some(change) = change {
                    changed.insert(key.clone(), change);
                }
            }
            if !changed.is_empty() {
                out.push((id.clone(), Change::Map(changed)));
            }
        }

        for (id, before) in &txn.list_before {
            if txn.created.contains(id) {
                continue;
            }
            let Some(container) = self.containers.get(id) else {
                continue;
            };
            let Body::List(elements) = &container.body else {
                continue;
            };
            let delta = list_delta(elements, before, doc);
            if delta.is_empty() {
                continue;
            }
            let change = match container.kind {
                ContainerKind::Text => Change::Text(delta),
                _ => Change::Array(delta),
            };
            out.push((id.clone(), change));
        }

        out
    }
}

fn list_delta(elements: &[Element], before: &HashSet<OpId>, doc: &Weak<DocInner>) -> Vec<Delta> {
    let mut delta: Vec<Delta> = Vec::new();
    let mut push = |d: Delta| match (delta.last_mut(), d) {
        (Some(Delta::Retain(n)), Delta::Retain(m)) => *n += m,
        (Some(Delta::Delete(n)), Delta::Delete(m)) => *n += m,
        (Some(Delta::Insert(values)), Delta::Insert(more)) => values.extend(more),
        (_, d) => delta.push(d),
    };
    for element in elements {
        let was = before.contains(&element.id);
        let is = !element.deleted;
        match (was, is) {
            (true, true) => push(Delta::Retain(1)),
            (true, false) => push(Delta::Delete(1)),
            (false, true) => push(Delta::Insert(vec![element.content.to_value(doc)])),
            (false, false) => {}
        }
    }
    if matches!(delta.last(), Some(Delta::Retain(_))) {
        delta.pop();
    }
    delta
}
