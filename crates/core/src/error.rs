//! Core error model.

use thiserror::Error;

/// Result type used across the pure model.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the model itself (validation, illegal transitions).
///
/// Infrastructure failures (database, network) belong to the crates that own
/// those concerns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A global transaction id was rejected.
    #[error("invalid gid: {0}")]
    InvalidGid(String),

    /// A status name could not be parsed.
    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    /// A transaction definition failed validation.
    #[error("invalid transaction definition: {0}")]
    InvalidDefinition(String),

    /// The requested global status transition is not part of the state machine.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

impl CoreError {
    pub fn invalid_gid(msg: impl Into<String>) -> Self {
        Self::InvalidGid(msg.into())
    }

    pub fn invalid_definition(msg: impl Into<String>) -> Self {
        Self::InvalidDefinition(msg.into())
    }

    pub fn unknown(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}
