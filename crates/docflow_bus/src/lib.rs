//! Message bus for the document pipeline.
//!
//! [`MessageBusAdapter`] owns the broker connection, declares the fixed
//! queue topology, publishes envelopes and runs one consume loop per queue.
//! The failure contract lives here: a delivery is acked only when its
//! handler succeeds, transient failures are requeued a bounded number of
//! times, and poison messages go straight to the dead-letter queue.

pub mod adapter;
#[cfg(feature = "amqp")]
pub mod amqp;
pub mod broker;
pub mod error;
pub mod handler;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod shutdown;

pub use adapter::{BusConfig, BusState, MessageBusAdapter};
pub use broker::{connect_broker, Broker, Delivery, Subscription};
pub use error::{BrokerError, BusError, HandlerError};
pub use handler::{disposition_for, Disposition, FnHandler, MessageHandler};
pub use memory::{MemoryBroker, QueueStats};
pub use metrics::{BusMetrics, BusMetricsSnapshot};
pub use retry::{publish_with_retry, RetryPolicy};
pub use shutdown::ShutdownToken;
