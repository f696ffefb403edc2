//! Wire contract of the document pipeline.
//!
//! Stages never call each other. Everything one stage tells the next travels
//! as an [`Envelope`] on one of the fixed [`queues`]:
//!
//! ```text
//! ocr.requests -> prediction.requests -> prediction.results
//!      |                 |
//!      +------> feedback.requests ... feedback.results -> training.requests -> training.results
//! ```

pub mod defaults;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod kind;
pub mod queues;

pub use envelope::{peek_correlation_id, Envelope, Payload, Sample};
pub use error::{ProtocolError, Result};
pub use ids::CorrelationId;
pub use kind::{FieldRequirement, FieldType, MessageKind};
