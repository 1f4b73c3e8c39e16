//! # Tandem Observable
//!
//! Mutable maps and arrays whose writes are observable.
//!
//! Every primitive write (a key or index assignment, a delete, an array
//! `length` change) produces a [`Record`]. Records are buffered per
//! subscription and delivered in batches by [`flush`], so a run of
//! synchronous mutations reaches each subscriber as one batch.
//!
//! ## Quick Start
//!
//! ```rust
//! use tandem_observable::{flush, ObservableMap, Value};
//!
//! let state = ObservableMap::new();
//! let _sub = state.subscribe(|records| println!("{} records", records.len()));
//!
//! state.set("title", "draft");
//! state.set("count", 1);
//! flush(); // prints "2 records"
//! ```
//!
//! Subscriptions see writes to descendants too, with paths relative to the
//! subscribed container. Scheduling is per thread: records queued on one
//! thread are delivered by a `flush` on that thread.

pub mod array;
pub mod map;
pub mod node;
pub mod record;
pub mod scheduler;
pub mod value;

pub use array::ObservableArray;
pub use map::ObservableMap;
pub use node::NodeId;
pub use record::{PathSegment, Record, RecordKind};
pub use scheduler::{flush, has_pending, Subscription, MAX_FLUSH_DELIVERIES};
pub use value::{number_to_json, Opaque, OpaqueKind, Value, ValueKind};

/// Create an observable container from a JSON document.
///
/// Primitives are returned as plain values.
pub fn observable(initial: serde_json::Value) -> Value {
    Value::from_json(initial)
}
