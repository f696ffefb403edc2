//! Bus error types with retry classification.

use std::time::Duration;
use thiserror::Error;

use docflow_protocol::ProtocolError;

use crate::adapter::BusState;

/// Failures reported by a [`crate::Broker`] implementation.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("unsupported broker url '{0}' (expected memory:// or amqp://)")]
    UnsupportedScheme(String),

    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),

    #[error("queue '{0}' already has an active consumer")]
    ConsumerBusy(String),

    #[error("unknown delivery tag {tag} on queue '{queue}'")]
    UnknownDelivery { queue: String, tag: u64 },

    #[error("broker connection closed")]
    Closed,

    #[error("broker operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("broker protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    /// Errors a caller may reasonably retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable { .. } | BrokerError::Timeout(_) | BrokerError::Protocol(_)
        )
    }
}

/// Errors surfaced by [`crate::MessageBusAdapter`].
#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] BrokerError),

    #[error("failed to declare queue '{queue}': {source}")]
    Declare {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to publish to '{queue}': {source}")]
    Publish {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("failed to consume '{queue}': {source}")]
    Consume {
        queue: String,
        #[source]
        source: BrokerError,
    },

    #[error("cannot encode envelope: {0}")]
    Encode(#[from] ProtocolError),

    #[error("operation not allowed while bus is {0}")]
    InvalidState(BusState),
}

impl BusError {
    /// Only publish failures caused by transport hiccups are retryable.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Publish { source, .. } if source.is_transient())
    }
}

/// Outcome of a [`crate::MessageHandler`] that did not succeed.
///
/// The variant decides the message's fate: poison is dead-lettered at once,
/// transient is requeued (up to the redelivery limit).
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Retrying will never help (schema violation, unexpected kind).
    #[error("poison message: {0}")]
    Poison(String),

    /// May succeed on redelivery (broker hiccup while publishing the result).
    #[error("transient failure: {0}")]
    Transient(String),
}

impl HandlerError {
    pub fn poison(message: impl Into<String>) -> Self {
        HandlerError::Poison(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        HandlerError::Transient(message.into())
    }

    pub fn is_poison(&self) -> bool {
        matches!(self, HandlerError::Poison(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::Transient(_))
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(err: ProtocolError) -> Self {
        HandlerError::Poison(err.to_string())
    }
}

impl From<BusError> for HandlerError {
    fn from(err: BusError) -> Self {
        if err.is_transient() {
            HandlerError::Transient(err.to_string())
        } else {
            match err {
                BusError::Encode(inner) => HandlerError::Poison(inner.to_string()),
                // bus closing or queue missing: hand the message back to the broker
                other => HandlerError::Transient(other.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_classification() {
        assert!(BrokerError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(BrokerError::Unreachable {
            url: "amqp://x".into(),
            reason: "refused".into()
        }
        .is_transient());
        assert!(!BrokerError::Closed.is_transient());
        assert!(!BrokerError::UnknownQueue("q".into()).is_transient());
    }

    #[test]
    fn test_bus_error_transient_only_for_publish() {
        let publish = BusError::Publish {
            queue: "q".into(),
            source: BrokerError::Timeout(Duration::from_millis(5)),
        };
        assert!(publish.is_transient());

        let declare = BusError::Declare {
            queue: "q".into(),
            source: BrokerError::Timeout(Duration::from_millis(5)),
        };
        assert!(!declare.is_transient());
    }

    #[test]
    fn test_handler_error_from_protocol_is_poison() {
        let err: HandlerError = ProtocolError::UnknownKind("X".into()).into();
        assert!(err.is_poison());
    }

    #[test]
    fn test_handler_error_from_bus_error() {
        let err: HandlerError = BusError::Publish {
            queue: "q".into(),
            source: BrokerError::Timeout(Duration::from_millis(5)),
        }
        .into();
        assert!(err.is_transient());

        let err: HandlerError = BusError::InvalidState(BusState::Closing).into();
        assert!(err.is_transient());
    }
}
