//! # tandem-bind
//!
//! Keeps an observable tree and a shared CRDT tree in step.
//!
//! This crate provides:
//! - [`bind`]: two-way synchronization between an observable container and
//!   a shared container, nested containers included
//! - An operation log parser that rebuilds inserts and deletes from the
//!   positional writes an observable array reports
//! - Value conversion and cross-model equality
//! - Transaction origins so listeners can tell their own updates apart
//!
//! ## Example
//!
//! ```rust
//! use serde_json::json;
//! use tandem_bind::{bind, BindOptions};
//! use tandem_observable::{flush, observable};
//! use tandem_shared::Doc;
//!
//! let doc = Doc::with_client_id(1);
//! let shared = doc.get_map("state");
//! let state = observable(json!({"todos": []}));
//!
//! let handle = bind(
//!     state.clone(),
//!     shared.clone(),
//!     BindOptions::builder().transaction_origin("local").build(),
//! )
//! .unwrap();
//!
//! let todos = state.as_map().unwrap().get("todos");
//! todos.as_array().unwrap().push("write docs");
//! flush();
//! assert_eq!(shared.to_json(), json!({"todos": ["write docs"]}));
//!
//! handle.unbind();
//! ```
//!
//! Observable writes are delivered in batches, so the shared side catches up
//! when [`tandem_observable::flush`] runs. Shared changes reach the
//! observable side synchronously when their transaction commits.

pub mod bridge;
pub mod engine;
pub mod error;
pub mod oplog;
pub mod options;
pub mod resolve;

pub use bridge::{map_slot_equal, to_plain, to_shared, values_equal, IdentityCache};
pub use engine::{bind, BindContext, BindHandle};
pub use error::{BindError, Result, Unsupported};
pub use oplog::{parse, parse_grouped, ArrayBatch, ArrayOp, ArrayOpKind};
pub use options::{with_transaction, BindOptions, BindOptionsBuilder, TransactionOrigin};
pub use resolve::{find, resolve, NodePair};
