//! Operations and the update wire format.
//!
//! An update is a JSON-encoded batch of operations. Operations are
//! idempotent: a replica remembers every operation id it has integrated and
//! ignores repeats, so updates can be relayed in any order and more than
//! once.

use crate::error::Result;
use crate::id::{ContainerId, OpId};
use crate::value::Content;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) enum Action {
    /// Last-writer-wins write of a map key; `None` deletes.
    MapSet {
        key: String,
        content: Option<Content>,
    },
    /// Insert after `origin` (or at the head).
    ListInsert {
        origin: Option<OpId>,
        content: Content,
    },
    /// Tombstone an element.
    ListDelete { element: OpId },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Op {
    pub(crate) id: OpId,
    pub(crate) target: ContainerId,
    pub(crate) action: Action,
}

const UPDATE_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct Update {
    version: u8,
    ops: Vec<Op>,
}

pub(crate) fn encode_update(ops: &[Op]) -> Vec<u8> {
    let update = Update {
        version: UPDATE_VERSION,
        ops: ops.to_vec(),
    };
    // Serializing plain derives into a Vec cannot fail.
    serde_json::to_vec(&update).unwrap_or_default()
}

pub(crate) fn decode_update(bytes: &[u8]) -> Result<Vec<Op>> {
    let update: Update = serde_json::from_slice(bytes)?;
    if update.version != UPDATE_VERSION {
        return Err(crate::error::SharedError::Decode(format!(
            "unsupported update version {}",
            update.version
        )));
    }
    Ok(update.ops)
}
