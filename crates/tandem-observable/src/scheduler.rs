//! Batched delivery of mutation records.
//!
//! Mutations never call listeners directly. Each subscription buffers the
//! records it receives and registers itself with the calling thread's queue
//! the first time its buffer becomes non-empty. [`flush`] drains that queue,
//! handing every subscription all records buffered since its last delivery
//! as one batch. Batches produced by listeners while flushing are delivered
//! within the same flush.

use crate::node::Node;
use crate::record::Record;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Upper bound on deliveries per flush; hitting it means listeners keep
/// feeding each other.
pub const MAX_FLUSH_DELIVERIES: usize = 10_000;

pub(crate) type Listener = Box<dyn Fn(&[Record]) + Send + Sync>;

thread_local! {
    static QUEUE: RefCell<VecDeque<Arc<Subscriber>>> = RefCell::new(VecDeque::new());
}

pub(crate) struct Subscriber {
    pending: Mutex<Vec<Record>>,
    listener: Listener,
    active: AtomicBool,
}

impl Subscriber {
    pub(crate) fn new(listener: Listener) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(Vec::new()),
            listener,
            active: AtomicBool::new(true),
        })
    }

    pub(crate) fn push(self: &Arc<Self>, record: Record) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let schedule = {
            let mut pending = self.pending.lock();
            pending.push(record);
            pending.len() == 1
        };
        if schedule {
            let subscriber = Arc::clone(self);
            QUEUE.with(|q| q.borrow_mut().push_back(subscriber));
        }
    }

    fn deliver(&self) -> bool {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() || !self.active.load(Ordering::Acquire) {
            return false;
        }
        (self.listener)(&batch);
        true
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the subscription alive;
/// call [`Subscription::unsubscribe`] to stop deliveries.
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    node: Weak<Node>,
}

impl Subscription {
    pub(crate) fn install(node: &Arc<Node>, listener: Listener) -> Self {
        let subscriber = Subscriber::new(listener);
        node.add_subscriber(Arc::clone(&subscriber));
        Self {
            subscriber,
            node: Arc::downgrade(node),
        }
    }

    /// Stop deliveries, discarding records not yet flushed. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.subscriber.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.subscriber.pending.lock().clear();
        if let Some(node) = self.node.upgrade() {
            node.remove_subscriber(&self.subscriber);
        }
    }

    pub fn is_active(&self) -> bool {
        self.subscriber.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Deliver every pending batch on this thread. Returns the number of
/// batches delivered.
pub fn flush() -> usize {
    let mut delivered = 0;
    loop {
        let next = QUEUE.with(|q| q.borrow_mut().pop_front());
        let Some(subscriber) = next else {
            break;
        };
        if subscriber.deliver() {
            delivered += 1;
        }
        if delivered >= MAX_FLUSH_DELIVERIES {
            let dropped = QUEUE.with(|q| {
                let mut q = q.borrow_mut();
                let n = q.len();
                for s in q.drain(..) {
                    s.pending.lock().clear();
                }
                n
            });
            tracing::warn!(delivered, dropped, "flush did not settle; dropping pending batches");
            break;
        }
    }
    delivered
}

/// Whether any subscription on this thread has undelivered records.
pub fn has_pending() -> bool {
    QUEUE.with(|q| !q.borrow().is_empty())
}
