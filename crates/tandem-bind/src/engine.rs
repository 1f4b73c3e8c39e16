//! The bind engine.
//!
//! A binding starts with a reconciliation pass (shared values win where both
//! sides hold a key, observable-only keys are written to the shared side in
//! one transaction) and then keeps both trees in step:
//!
//! - the observable root has one subscription. Each flushed batch is split
//!   by the container that was written, parents first, and applied in a
//!   single shared transaction,
//! - the shared root has one deep observer that routes each event to the
//!   pair it concerns through path resolution.
//!
//! Writes in either direction are preceded by an equality check against the
//! other side, so a write that merely mirrors the other side is never sent
//! back. Pairs whose shared container is removed are released.

use crate::bridge::{
    map_slot_equal, to_plain, to_plain_slot, to_shared, values_equal, IdentityCache,
};
use crate::error::{BindError, Result, Unsupported};
use crate::oplog::{self, ArrayBatch, ArrayOp, ArrayOpKind};
use crate::options::{with_transaction, BindOptions};
use crate::resolve::{find, resolve, shared_path, NodePair};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_observable::{
    NodeId, ObservableArray, ObservableMap, PathSegment, Record, Subscription, Value,
};
use tandem_shared::{
    Change, Delta, Doc, Event, KeyChange, ObserverHandle, SharedArray, SharedMap, SharedValue,
    TransactionInfo,
};
use tracing::{debug, trace, warn};

/// State shared by every pair of one [`bind`] call.
pub struct BindContext {
    options: BindOptions,
    cache: IdentityCache,
    subscription: Mutex<Option<Subscription>>,
    observers: Mutex<Vec<ObserverHandle>>,
    active: AtomicBool,
}

impl BindContext {
    pub fn new(options: BindOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            cache: IdentityCache::new(),
            subscription: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
            active: AtomicBool::new(true),
        })
    }

    pub fn options(&self) -> &BindOptions {
        &self.options
    }

    pub fn cache(&self) -> &IdentityCache {
        &self.cache
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Number of container pairs currently bound, the root included.
    pub fn bound_nodes(&self) -> usize {
        self.cache.len()
    }

    fn teardown(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        let observers: Vec<ObserverHandle> = self.observers.lock().drain(..).collect();
        for observer in observers {
            observer.unobserve();
        }
        self.cache.clear();
    }
}

impl std::fmt::Debug for BindContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindContext")
            .field("active", &self.is_active())
            .field("bound_nodes", &self.bound_nodes())
            .field("options", &self.options)
            .finish()
    }
}

/// A live binding. Dropping the handle leaves the binding in place; call
/// [`BindHandle::unbind`] to stop it.
#[derive(Clone, Debug)]
pub struct BindHandle {
    ctx: Arc<BindContext>,
}

impl BindHandle {
    /// Remove the subscription and observer of this binding. Idempotent.
    pub fn unbind(&self) {
        if self.ctx.is_active() {
            debug!(bound_nodes = self.ctx.bound_nodes(), "unbinding");
        }
        self.ctx.teardown();
    }

    pub fn is_bound(&self) -> bool {
        self.ctx.is_active()
    }

    pub fn context(&self) -> &Arc<BindContext> {
        &self.ctx
    }
}

fn shared_kind(value: &SharedValue) -> &'static str {
    match value {
        SharedValue::Null => "null",
        SharedValue::Bool(_) => "boolean",
        SharedValue::Number(_) => "number",
        SharedValue::String(_) => "string",
        SharedValue::Map(_) => "map",
        SharedValue::Array(_) => "array",
        SharedValue::Text(_) => "text",
    }
}

fn shared_doc(pair: &NodePair) -> Option<Doc> {
    match pair {
        NodePair::Map { shared, .. } => shared.doc(),
        NodePair::Array { shared, .. } => shared.doc(),
    }
}

/// Bind an observable container to a shared container of the same kind.
///
/// Reconciles both sides, then keeps them in step until
/// [`BindHandle::unbind`]. Containers of different kinds cannot be bound;
/// that case is logged and yields a handle that does nothing.
///
/// # Errors
///
/// Fails when a shared write made during reconciliation fails, e.g. because
/// the document was dropped. Nothing is left subscribed in that case.
pub fn bind(
    observable: impl Into<Value>,
    shared: impl Into<SharedValue>,
    options: BindOptions,
) -> Result<BindHandle> {
    let observable = observable.into();
    let shared = shared.into();
    let ctx = BindContext::new(options);

    let Some(root) = NodePair::new(&observable, &shared) else {
        warn!(
            observable = %observable.kind(),
            shared = shared_kind(&shared),
            "cannot bind containers of different kinds; nothing will be synchronized"
        );
        ctx.teardown();
        return Ok(BindHandle { ctx });
    };

    if let Err(err) = bind_pair(&ctx, &root) {
        ctx.teardown();
        return Err(err);
    }
    subscribe_root(&ctx, &root);
    let observer = observe_shared(&ctx, root.clone());
    ctx.observers.lock().push(observer);

    debug!(
        observable = %root.observable_id(),
        shared = %root.shared_id(),
        bound_nodes = ctx.bound_nodes(),
        "bound"
    );
    Ok(BindHandle { ctx })
}

/// Reconcile one pair and remember it.
///
/// Pairs this binding already keeps in step are left alone. Any difference
/// between their sides belongs to a batch that has not been flushed yet.
pub(crate) fn bind_pair(ctx: &Arc<BindContext>, pair: &NodePair) -> Result<()> {
    if !ctx.is_active() {
        return Ok(());
    }
    let node = pair.observable_id();
    if ctx.cache.is_bound_together(node, pair.shared_id()) {
        return Ok(());
    }

    match pair {
        NodePair::Map { observable, shared } => reconcile_map(ctx, observable, shared)?,
        NodePair::Array { observable, shared } => reconcile_array(ctx, observable, shared)?,
    }
    ctx.cache.remember(node, pair.shared_id());
    trace!(observable = %node, shared = %pair.shared_id(), "pair bound");
    Ok(())
}

/// Both sides are containers this binding pairs with each other.
fn same_pair(ctx: &BindContext, value: &Value, current: &SharedValue) -> bool {
    match (value.node_id(), current.container_id()) {
        (Some(node), Some(id)) => ctx.cache.is_bound_together(node, id),
        _ => false,
    }
}

fn slot_matches(ctx: &BindContext, value: &Value, current: &SharedValue) -> bool {
    same_pair(ctx, value, current) || values_equal(value, current)
}

/// Same length, and every element equal or bound to the element at the
/// same position.
fn aligned(ctx: &BindContext, observable: &ObservableArray, shared: &SharedArray) -> bool {
    let left = observable.to_vec();
    let right = shared.to_vec();
    left.len() == right.len()
        && left
            .iter()
            .zip(&right)
            .all(|(value, current)| slot_matches(ctx, value, current))
}

/// Whether [`sync_map_key`] would leave the shared key as it is.
fn key_settled(ctx: &BindContext, observable: &ObservableMap, shared: &SharedMap, key: &str) -> bool {
    let value = observable.get(key);
    match shared.get(key) {
        Some(SharedValue::Text(_)) => true,
        _ if matches!(value, Value::Opaque(_)) => true,
        Some(current) if same_pair(ctx, &value, &current) => true,
        current => map_slot_equal(&value, current.as_ref()),
    }
}

/// Run `f` inside a transaction on `doc` when it is going to write.
fn transact_if(
    ctx: &BindContext,
    writes: bool,
    doc: Option<Doc>,
    f: impl FnOnce() -> Result<()>,
) -> Result<()> {
    if writes {
        with_transaction(doc.as_ref(), &ctx.options, f)
    } else {
        f()
    }
}

fn bind_child(ctx: &Arc<BindContext>, observable: &Value, shared: &SharedValue) -> Result<()> {
    match NodePair::new(observable, shared) {
        Some(child) => bind_pair(ctx, &child),
        None => Ok(()),
    }
}

/// Forget every pair whose shared side is `value` or lies below it.
fn release_shared(ctx: &BindContext, value: &SharedValue) {
    let children: Vec<SharedValue> = match value {
        SharedValue::Map(map) => map.entries().into_iter().map(|(_, child)| child).collect(),
        SharedValue::Array(array) => array.to_vec(),
        _ => return,
    };
    if let Some(id) = value.container_id() {
        if let Some(node) = ctx.cache.forget_container(id) {
            trace!(observable = %node, shared = %id, "pair released");
        }
    }
    for child in &children {
        release_shared(ctx, child);
    }
}

/// Forget every pair whose observable side is `value` or lies below it.
fn release_observable(ctx: &BindContext, value: &Value) {
    let children: Vec<Value> = match value {
        Value::Map(map) => map.entries().into_iter().map(|(_, child)| child).collect(),
        Value::Array(array) => array.to_vec(),
        _ => return,
    };
    if let Some(node) = value.node_id() {
        if let Some(shared) = ctx.cache.forget(node) {
            trace!(observable = %node, shared = %shared, "pair released");
        }
    }
    for child in &children {
        release_observable(ctx, child);
    }
}

fn reconcile_map(ctx: &Arc<BindContext>, observable: &ObservableMap, shared: &SharedMap) -> Result<()> {
    for (key, value) in shared.entries() {
        sync_observable_key(ctx, observable, &key, &value)?;
    }

    let keys = observable.keys();
    let writes = !keys
        .iter()
        .all(|key| key_settled(ctx, observable, shared, key));
    transact_if(ctx, writes, shared.doc(), || {
        keys.iter()
            .try_for_each(|key| sync_map_key(ctx, observable, shared, key))
    })
}

fn reconcile_array(
    ctx: &Arc<BindContext>,
    observable: &ObservableArray,
    shared: &SharedArray,
) -> Result<()> {
    for (index, value) in shared.to_vec().into_iter().enumerate() {
        let current = observable.get(index);
        if index < observable.len() && slot_matches(ctx, &current, &value) {
            bind_child(ctx, &current, &value)?;
            continue;
        }
        let plain = to_plain_slot(&value);
        observable.splice(index as isize, 0, vec![plain.clone()]);
        bind_child(ctx, &plain, &value)?;
    }

    let writes = !aligned(ctx, observable, shared);
    transact_if(ctx, writes, shared.doc(), || {
        for (index, value) in observable.to_vec().into_iter().enumerate() {
            if let Some(current) = shared.get(index) {
                if slot_matches(ctx, &value, &current) {
                    bind_child(ctx, &value, &current)?;
                    continue;
                }
            }
            let converted = array_slot(ctx, index, &value)?;
            insert_padded(shared, index, converted)?;
        }
        Ok(())
    })?;

    if observable.len() > shared.len() {
        observable.set_len(shared.len());
    }
    Ok(())
}

/// Bring one observable key in line with the shared value.
fn sync_observable_key(
    ctx: &Arc<BindContext>,
    observable: &ObservableMap,
    key: &str,
    value: &SharedValue,
) -> Result<()> {
    if let SharedValue::Text(text) = value {
        warn!(key, container = %text.id(), "{}; key skipped", Unsupported::SharedText);
        return Ok(());
    }
    let current = observable.get(key);
    if same_pair(ctx, &current, value) {
        return Ok(());
    }
    if map_slot_equal(&current, Some(value)) {
        return bind_child(ctx, &current, value);
    }
    let plain = to_plain(value)?;
    observable.set(key, plain.clone());
    release_observable(ctx, &current);
    bind_child(ctx, &plain, value)
}

/// Bring one shared key in line with the observable key.
fn sync_map_key(
    ctx: &Arc<BindContext>,
    observable: &ObservableMap,
    shared: &SharedMap,
    key: &str,
) -> Result<()> {
    let value = observable.get(key);
    let current = shared.get(key);
    if let Some(SharedValue::Text(_)) = current {
        debug!(key, "shared text is not overwritten from the observable side");
        return Ok(());
    }

    match &value {
        Value::Undefined => {
            if let Some(current) = current {
                trace!(key, "delete map key");
                shared.delete(key)?;
                release_shared(ctx, &current);
            }
            return Ok(());
        }
        Value::Opaque(_) => {
            warn!(key, kind = %value.kind(), "value cannot be stored in the shared tree; key left untouched");
            return Ok(());
        }
        _ => {}
    }

    if let Some(current) = &current {
        if same_pair(ctx, &value, current) {
            return Ok(());
        }
        if values_equal(&value, current) {
            return bind_child(ctx, &value, current);
        }
    }
    let converted = to_shared(ctx, &value)?;
    trace!(key, "write map key");
    shared.set(key, converted)?;
    if let Some(current) = current {
        release_shared(ctx, &current);
    }
    Ok(())
}

/// Convert one array element; unsupported values are stored as `Null`.
fn array_slot(ctx: &Arc<BindContext>, index: usize, value: &Value) -> Result<SharedValue> {
    match to_shared(ctx, value) {
        Err(BindError::Unsupported(unsupported)) => {
            warn!(index, "{}; storing null", unsupported);
            Ok(SharedValue::Null)
        }
        other => other,
    }
}

/// Insert at `index`, filling any gap past the end with `Null`.
fn insert_padded(shared: &SharedArray, index: usize, value: SharedValue) -> Result<()> {
    let len = shared.len();
    if index > len {
        let mut values = vec![SharedValue::Null; index - len];
        values.push(value);
        shared.insert(len, values)?;
    } else {
        shared.insert(index, vec![value])?;
    }
    Ok(())
}

fn subscribe_root(ctx: &Arc<BindContext>, root: &NodePair) {
    let handler = Arc::clone(ctx);
    let pair = root.clone();
    let subscription = match root {
        NodePair::Map { observable, .. } => {
            observable.subscribe(move |records| on_observable_batch(&handler, &pair, records))
        }
        NodePair::Array { observable, .. } => {
            observable.subscribe(move |records| on_observable_batch(&handler, &pair, records))
        }
    };
    let replaced = ctx.subscription.lock().replace(subscription);
    if let Some(replaced) = replaced {
        replaced.unsubscribe();
    }
}

/// The records of one batch that concern one container.
#[derive(Debug)]
enum Group {
    Map {
        target: NodeId,
        path: Vec<PathSegment>,
        keys: Vec<String>,
    },
    Array(ArrayBatch),
}

impl Group {
    fn target(&self) -> NodeId {
        match self {
            Group::Map { target, .. } => *target,
            Group::Array(batch) => batch.target,
        }
    }

    fn path(&self) -> &[PathSegment] {
        match self {
            Group::Map { path, .. } => path,
            Group::Array(batch) => &batch.path,
        }
    }
}

/// Split a batch by written container, shallowest containers first.
fn group_records(records: &[Record]) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for record in records {
        let Some(PathSegment::Key(key)) = record.last_segment() else {
            continue;
        };
        let position = groups.iter().position(|group| {
            matches!(group, Group::Map { target, .. } if *target == record.target)
        });
        match position {
            Some(index) => {
                if let Group::Map { keys, .. } = &mut groups[index] {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
            None => groups.push(Group::Map {
                target: record.target,
                path: record.parent_path().to_vec(),
                keys: vec![key.clone()],
            }),
        }
    }
    groups.extend(oplog::parse_grouped(records).into_iter().map(Group::Array));
    groups.sort_by_key(|group| group.path().len());
    groups
}

/// Find the bound pair whose observable side is `target`. The recorded
/// path is tried first; it may be out of date, in which case the bound
/// pairs are searched.
fn locate(
    ctx: &BindContext,
    root: &NodePair,
    target: NodeId,
    path: &[PathSegment],
) -> Option<NodePair> {
    let bound =
        |pair: &NodePair| ctx.cache.is_bound_together(pair.observable_id(), pair.shared_id());
    shared_path(path)
        .and_then(|path| resolve(root, &path))
        .filter(|pair| pair.observable_id() == target && bound(pair))
        .or_else(|| find(root, target, &bound))
}

fn group_settled(ctx: &BindContext, pair: &NodePair, group: &Group) -> bool {
    match (pair, group) {
        (NodePair::Map { observable, shared }, Group::Map { keys, .. }) => keys
            .iter()
            .all(|key| key_settled(ctx, observable, shared, key)),
        (NodePair::Array { observable, shared }, Group::Array(_)) => {
            aligned(ctx, observable, shared)
        }
        _ => true,
    }
}

fn on_observable_batch(ctx: &Arc<BindContext>, root: &NodePair, records: &[Record]) {
    if !ctx.is_active() {
        return;
    }
    let groups = group_records(records);
    if groups.is_empty() {
        return;
    }
    let settled = groups.iter().all(|group| {
        locate(ctx, root, group.target(), group.path())
            .map_or(true, |pair| group_settled(ctx, &pair, group))
    });
    trace!(records = records.len(), groups = groups.len(), settled, "observable batch");

    let result = transact_if(ctx, !settled, shared_doc(root), || {
        for group in &groups {
            if let Err(err) = apply_group(ctx, root, group) {
                warn!(node = %group.target(), error = %err, "failed to apply observable changes");
            }
        }
        Ok(())
    });
    if let Err(err) = result {
        warn!(error = %err, "failed to apply observable batch");
    }
}

fn apply_group(ctx: &Arc<BindContext>, root: &NodePair, group: &Group) -> Result<()> {
    let Some(pair) = locate(ctx, root, group.target(), group.path()) else {
        trace!(node = %group.target(), "container is no longer bound; records dropped");
        return Ok(());
    };
    match (&pair, group) {
        (NodePair::Map { observable, shared }, Group::Map { keys, .. }) => keys
            .iter()
            .try_for_each(|key| sync_map_key(ctx, observable, shared, key)),
        (NodePair::Array { observable, shared }, Group::Array(batch)) => {
            apply_array_ops(ctx, observable, shared, &batch.ops)
        }
        _ => Ok(()),
    }
}

fn apply_array_ops(
    ctx: &Arc<BindContext>,
    observable: &ObservableArray,
    shared: &SharedArray,
    ops: &[ArrayOp],
) -> Result<()> {
    if aligned(ctx, observable, shared) {
        return bind_elements(ctx, observable, shared);
    }

    with_transaction(shared.doc().as_ref(), &ctx.options, || -> Result<()> {
        let replayed = ops.iter().try_for_each(|op| replay(ctx, shared, op));
        if let Err(err) = &replayed {
            debug!(error = %err, "array replay failed");
        }
        if replayed.is_err() || !aligned(ctx, observable, shared) {
            debug!(node = %observable.id(), ops = ops.len(), "array replay diverged; rewriting");
            rewrite_array(ctx, observable, shared)?;
        }
        Ok(())
    })?;
    bind_elements(ctx, observable, shared)
}

fn replay(ctx: &Arc<BindContext>, shared: &SharedArray, op: &ArrayOp) -> Result<()> {
    trace!(op = %op, "replay");
    match op.kind {
        ArrayOpKind::Delete => match shared.get(op.index) {
            Some(removed) => {
                shared.delete(op.index, 1)?;
                release_shared(ctx, &removed);
            }
            None => trace!(index = op.index, "delete out of bounds skipped"),
        },
        ArrayOpKind::Set => {
            let removed = shared.get(op.index);
            if removed.is_some() {
                shared.delete(op.index, 1)?;
            }
            insert_padded(shared, op.index, array_slot(ctx, op.index, &op.value)?)?;
            if let Some(removed) = removed {
                release_shared(ctx, &removed);
            }
        }
        ArrayOpKind::Insert => {
            insert_padded(shared, op.index, array_slot(ctx, op.index, &op.value)?)?;
        }
    }
    Ok(())
}

fn rewrite_array(
    ctx: &Arc<BindContext>,
    observable: &ObservableArray,
    shared: &SharedArray,
) -> Result<()> {
    let removed = shared.to_vec();
    if !removed.is_empty() {
        shared.delete(0, removed.len())?;
    }
    for value in &removed {
        release_shared(ctx, value);
    }
    let values = observable
        .to_vec()
        .iter()
        .enumerate()
        .map(|(index, value)| array_slot(ctx, index, value))
        .collect::<Result<Vec<_>>>()?;
    if !values.is_empty() {
        shared.insert(0, values)?;
    }
    Ok(())
}

fn bind_elements(
    ctx: &Arc<BindContext>,
    observable: &ObservableArray,
    shared: &SharedArray,
) -> Result<()> {
    for (value, current) in observable.to_vec().iter().zip(shared.to_vec()) {
        bind_child(ctx, value, &current)?;
    }
    Ok(())
}

fn observe_shared(ctx: &Arc<BindContext>, root: NodePair) -> ObserverHandle {
    let handler = Arc::clone(ctx);
    let target = root.clone();
    let callback = move |events: &[Event], info: &TransactionInfo| {
        on_shared_change(&handler, &root, events, info)
    };
    match target {
        NodePair::Map { shared, .. } => shared.observe_deep(callback),
        NodePair::Array { shared, .. } => shared.observe_deep(callback),
    }
}

fn on_shared_change(
    ctx: &Arc<BindContext>,
    root: &NodePair,
    events: &[Event],
    info: &TransactionInfo,
) {
    if !ctx.is_active() {
        return;
    }
    trace!(events = events.len(), origin = ?info.origin, local = info.local, "shared change");
    for event in events {
        let Some(pair) = resolve(root, &event.path) else {
            debug!(path = ?event.path, "event target is gone; dropped");
            continue;
        };
        if pair.shared_id() != &event.target {
            debug!(path = ?event.path, target = %event.target, "event path no longer leads to its target; dropped");
            continue;
        }
        if !ctx.cache.is_bound_together(pair.observable_id(), pair.shared_id()) {
            debug!(path = ?event.path, "observable side awaits a local replacement; event dropped");
            continue;
        }
        let result = match (&pair, &event.change) {
            (NodePair::Map { observable, shared }, Change::Map(keys)) => {
                apply_key_changes(ctx, observable, shared, keys)
            }
            (NodePair::Array { observable, shared }, Change::Array(delta)) => {
                apply_delta(ctx, observable, shared, delta)
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(target = %event.target, error = %err, "failed to apply shared changes");
        }
    }
}

fn apply_key_changes(
    ctx: &Arc<BindContext>,
    observable: &ObservableMap,
    shared: &SharedMap,
    keys: &BTreeMap<String, KeyChange>,
) -> Result<()> {
    for (key, change) in keys {
        trace!(key = %key, action = ?change.action, "shared key changed");
        if let Some(old) = &change.old {
            release_shared(ctx, old);
        }
        let Some(value) = shared.get(key) else {
            if observable.contains_key(key) {
                let removed = observable.delete(key);
                release_observable(ctx, &removed);
            }
            continue;
        };
        sync_observable_key(ctx, observable, key, &value)?;
    }
    Ok(())
}

fn apply_delta(
    ctx: &Arc<BindContext>,
    observable: &ObservableArray,
    shared: &SharedArray,
    delta: &[Delta],
) -> Result<()> {
    if aligned(ctx, observable, shared) {
        return bind_elements(ctx, observable, shared);
    }
    let mut cursor = 0;
    for segment in delta {
        match segment {
            Delta::Retain(n) => cursor += n,
            Delta::Delete(n) => {
                for removed in observable.splice(cursor as isize, *n, Vec::new()) {
                    release_observable(ctx, &removed);
                }
            }
            Delta::Insert(values) => {
                let plain: Vec<Value> = values.iter().map(to_plain_slot).collect();
                observable.splice(cursor as isize, 0, plain.clone());
                for (value, inserted) in plain.iter().zip(values) {
                    bind_child(ctx, value, inserted)?;
                }
                cursor += values.len();
            }
        }
    }
    Ok(())
}
