//! Error types for the shared tree.

use crate::id::{ContainerId, ContainerKind};
use thiserror::Error;

/// Errors that can occur when reading, writing or merging shared containers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SharedError {
    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: ContainerKind,
        found: ContainerKind,
    },

    #[error("Container is already part of a document: {0}")]
    AlreadyIntegrated(ContainerId),

    #[error("Container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("Document has been dropped")]
    DocumentDropped,

    #[error("Malformed update: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        SharedError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SharedError>;
