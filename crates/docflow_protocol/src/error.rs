//! Protocol error types.

use thiserror::Error;

use crate::MessageKind;

/// Errors raised while building or decoding an [`crate::Envelope`].
///
/// Every variant describes a message that can never be processed no matter
/// how often it is redelivered, so the bus treats all of them as poison.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unknown message kind '{0}'")]
    UnknownKind(String),

    #[error("{kind} envelope is missing required field '{field}'")]
    MissingField { kind: MessageKind, field: &'static str },

    #[error("{kind} envelope field '{field}' must be {expected}")]
    InvalidField {
        kind: MessageKind,
        field: &'static str,
        expected: &'static str,
    },

    #[error("correlation id must not be empty")]
    EmptyCorrelationId,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
