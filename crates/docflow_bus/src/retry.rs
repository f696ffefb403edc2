//! Caller-side publish retry.
//!
//! [`crate::MessageBusAdapter::publish`] reports failures without retrying;
//! callers that want another try go through [`publish_with_retry`].

use std::time::Duration;
use tracing::warn;

use docflow_protocol::defaults::{
    DEFAULT_PUBLISH_RETRIES, DEFAULT_PUBLISH_RETRY_BASE_MS, MAX_PUBLISH_RETRY_DELAY_MS,
};
use docflow_protocol::Envelope;

use crate::adapter::MessageBusAdapter;
use crate::error::BusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_PUBLISH_RETRIES,
            base_delay_ms: DEFAULT_PUBLISH_RETRY_BASE_MS,
            max_delay_ms: MAX_PUBLISH_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// A single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay_ms`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Publish, retrying transient failures with exponential backoff.
///
/// Non-transient errors (bus closing, encode failure, undeclared queue)
/// return immediately.
pub async fn publish_with_retry(
    bus: &MessageBusAdapter,
    queue: &str,
    envelope: &Envelope,
    policy: RetryPolicy,
) -> Result<(), BusError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match bus.publish(queue, envelope).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    queue,
                    correlation_id = %envelope.correlation_id(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Publish failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
