//! # tandem-shared
//!
//! A replicated document tree for Tandem.
//!
//! This crate provides:
//! - Documents holding named root maps, arrays and text
//! - Last-writer-wins maps and RGA arrays/text that converge under any
//!   delivery order, with duplicates ignored and early operations parked
//! - Detached containers that join a document when written into one
//! - Transactions tagged with an origin, producing one update each
//! - Shallow and deep observers receiving per-transaction events
//!
//! ## Example
//!
//! ```rust
//! use tandem_shared::{Doc, SharedMap};
//!
//! let a = Doc::with_client_id(1);
//! let b = Doc::with_client_id(2);
//!
//! let profile = SharedMap::new();
//! profile.set("name", "ada").unwrap();
//! a.get_map("root").set("profile", profile).unwrap();
//!
//! b.apply_update(&a.encode_state_as_update(), None).unwrap();
//! assert_eq!(b.get_map("root").to_json(), a.get_map("root").to_json());
//! ```

pub mod array;
pub mod doc;
pub mod error;
pub mod event;
pub mod id;
pub mod map;
pub mod text;
pub mod value;

mod handle;
mod op;
mod store;
mod txn;

pub use array::SharedArray;
pub use doc::{apply_update, Doc, UpdateSubscription};
pub use error::{Result, SharedError};
pub use event::{
    Change, Delta, Event, KeyAction, KeyChange, ObserverHandle, PathSegment, TransactionInfo,
};
pub use id::{ClientId, ContainerId, ContainerKind, OpId, Origin};
pub use map::SharedMap;
pub use text::SharedText;
pub use value::SharedValue;
