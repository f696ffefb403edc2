//! Consumer callback contract and the ack/nack decision.

use async_trait::async_trait;
use std::future::Future;

use docflow_protocol::Envelope;

use crate::error::HandlerError;

/// Processes one decoded envelope from a queue.
///
/// `Ok` acknowledges the delivery. The [`HandlerError`] variant decides
/// between requeue and dead-letter.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Used in logs.
    fn name(&self) -> &str;

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        (self.func)(envelope).await
    }
}

/// What the consume loop does with a delivery once handling is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    DeadLetter,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Ack => "ack",
            Disposition::Requeue => "requeue",
            Disposition::DeadLetter => "dead_letter",
        }
    }
}

/// Transient failures are requeued until the message has been delivered
/// more than `max_redeliveries` times, then dead-lettered like poison.
pub fn disposition_for(
    result: &Result<(), HandlerError>,
    attempt: u32,
    max_redeliveries: u32,
) -> Disposition {
    match result {
        Ok(()) => Disposition::Ack,
        Err(HandlerError::Poison(_)) => Disposition::DeadLetter,
        Err(HandlerError::Transient(_)) if attempt > max_redeliveries => Disposition::DeadLetter,
        Err(HandlerError::Transient(_)) => Disposition::Requeue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_acks() {
        assert_eq!(disposition_for(&Ok(()), 1, 3), Disposition::Ack);
    }

    #[test]
    fn test_poison_never_requeued() {
        let result = Err(HandlerError::poison("missing field"));
        assert_eq!(disposition_for(&result, 1, 3), Disposition::DeadLetter);
    }

    #[test]
    fn test_transient_requeued_until_limit() {
        let result = Err(HandlerError::transient("broker timeout"));
        assert_eq!(disposition_for(&result, 1, 3), Disposition::Requeue);
        assert_eq!(disposition_for(&result, 3, 3), Disposition::Requeue);
        assert_eq!(disposition_for(&result, 4, 3), Disposition::DeadLetter);
        assert_eq!(disposition_for(&result, 1, 0), Disposition::DeadLetter);
    }
}
