use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use docflow_bus::{HandlerError, MessageHandler};
use docflow_protocol::{Envelope, MessageKind, Payload, Sample};

use super::{Stage, StageContext, StageHandler};
use crate::collaborators::FeedbackStore;
use crate::coordinator::StageOutcome;

/// Persists human corrections and turns each into a training sample.
pub struct FeedbackStageHandler {
    ctx: StageContext,
    store: Arc<dyn FeedbackStore>,
}

impl FeedbackStageHandler {
    pub fn new(ctx: StageContext, store: Arc<dyn FeedbackStore>) -> Self {
        Self { ctx, store }
    }
}

impl StageHandler for FeedbackStageHandler {
    fn stage(&self) -> Stage {
        Stage::Feedback
    }
}

#[async_trait]
impl MessageHandler for FeedbackStageHandler {
    fn name(&self) -> &str {
        Stage::Feedback.as_str()
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.ctx.check_kind(Stage::Feedback, &envelope)?;
        let label = envelope.text_field("label")?.to_string();
        let text = envelope.payload().get_str("text").unwrap_or_default().to_string();

        // No failure branch exists past a submitted correction: a store
        // outage hands the message back for a bounded number of redeliveries.
        self.ctx
            .call(
                Stage::Feedback,
                &envelope,
                self.store.save_correction(envelope.correlation_id(), &label),
            )
            .await
            .map_err(|e| HandlerError::transient(format!("feedback store: {e}")))?;

        let sample = Sample {
            correlation_id: envelope.correlation_id().clone(),
            text,
            label,
        };
        let sample = serde_json::to_value(&sample)
            .map_err(|e| HandlerError::poison(e.to_string()))?;
        let payload = Payload::new().with("samples", Value::Array(vec![sample]));

        self.ctx
            .advance(
                Stage::Feedback,
                &envelope,
                MessageKind::FeedbackSubmitted,
                StageOutcome::Succeeded,
                payload,
            )
            .await?;
        Ok(())
    }
}
