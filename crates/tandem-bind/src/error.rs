//! Error types for the binding layer.

use tandem_observable::ValueKind;
use tandem_shared::SharedError;
use thiserror::Error;

/// A value that has no counterpart on the other side.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Unsupported {
    #[error("{0} values cannot be stored in the shared tree")]
    Observable(ValueKind),

    #[error("Shared text has no observable counterpart")]
    SharedText,
}

/// Errors raised while binding.
///
/// Only initial reconciliation returns them to the caller; once
/// subscriptions are installed every error is logged instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindError {
    #[error("Shared tree error: {0}")]
    Shared(#[from] SharedError),

    #[error(transparent)]
    Unsupported(#[from] Unsupported),
}

pub type Result<T> = std::result::Result<T, BindError>;
