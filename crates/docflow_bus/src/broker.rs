//! Transport seam between the adapter and a concrete broker.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::error::BrokerError;
use crate::memory::MemoryBroker;

/// One message handed to a consumer, pending ack or nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
    /// 1 on first delivery, incremented on each redelivery.
    pub attempt: u32,
}

/// An at-least-once message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Idempotently ensure `queue` exists.
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError>;

    async fn publish(&self, queue: &str, body: Vec<u8>, persistent: bool) -> Result<(), BrokerError>;

    /// Attach the single consumer of `queue`. At most `prefetch` deliveries
    /// are outstanding at once.
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Consumer side of one queue.
///
/// Dropping a subscription returns its unacknowledged deliveries to the
/// queue.
#[async_trait]
pub trait Subscription: Send {
    fn queue(&self) -> &str;

    /// Next delivery; `None` once the broker is closed.
    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>>;

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError>;

    /// `requeue = false` routes the message to the dead-letter queue.
    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

/// Open a broker connection. One attempt, no retry.
///
/// `memory://` gives an in-process broker; `amqp://` / `amqps://` need the
/// `amqp` feature.
pub async fn connect_broker(url: &str) -> Result<Arc<dyn Broker>, BrokerError> {
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| BrokerError::UnsupportedScheme(url.to_string()))?;

    match scheme.as_str() {
        "memory" => {
            info!("Using in-process memory broker");
            Ok(Arc::new(MemoryBroker::new()))
        }
        #[cfg(feature = "amqp")]
        "amqp" | "amqps" => {
            let broker = crate::amqp::AmqpBroker::connect(url).await?;
            Ok(Arc::new(broker))
        }
        _ => Err(BrokerError::UnsupportedScheme(url.to_string())),
    }
}
