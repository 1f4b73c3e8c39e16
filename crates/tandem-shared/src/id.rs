//! Identifiers: replicas, operations, containers and transaction origins.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifies one replica of a document.
pub type ClientId = u64;

/// Unique identifier of an operation.
///
/// Ordered by Lamport clock, then by client, which gives every replica the
/// same total order for last-writer-wins and sibling ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    pub clock: u64,
    pub client: ClientId,
}

impl OpId {
    pub fn new(clock: u64, client: ClientId) -> Self {
        Self { clock, client }
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.clock, self.client)
    }
}

/// Identity of a shared container.
///
/// Root containers are named; nested containers get a ULID when they are
/// created, before they are attached to any document, so a detached
/// container keeps its identity once integrated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContainerId {
    Root(String),
    Nested(Ulid),
}

impl ContainerId {
    pub(crate) fn fresh() -> Self {
        ContainerId::Nested(Ulid::new())
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ContainerId::Root(_))
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerId::Root(name) => write!(f, "root:{}", name),
            ContainerId::Nested(ulid) => write!(f, "{}", ulid),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerKind {
    Map,
    Array,
    Text,
}

impl ContainerKind {
    pub(crate) fn is_list(self) -> bool {
        matches!(self, ContainerKind::Array | ContainerKind::Text)
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Map => write!(f, "map"),
            ContainerKind::Array => write!(f, "array"),
            ContainerKind::Text => write!(f, "text"),
        }
    }
}

/// Tag attached to a transaction and reported to observers and update
/// listeners, so they can tell where a change came from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn new(tag: impl Into<String>) -> Self {
        Origin(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Origin {
    fn from(tag: &str) -> Self {
        Origin(tag.to_string())
    }
}

impl From<String> for Origin {
    fn from(tag: String) -> Self {
        Origin(tag)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
