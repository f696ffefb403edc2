use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use docflow_bus::{HandlerError, MessageHandler};
use docflow_protocol::{Envelope, MessageKind, Payload};

use super::{Stage, StageContext, StageHandler};
use crate::collaborators::{ClassificationModel, CollaboratorError};
use crate::coordinator::{StageOutcome, Transition};

/// Classifies OCR text. Confident predictions complete the journey, the
/// rest are handed to a human.
pub struct PredictionStageHandler {
    ctx: StageContext,
    model: Arc<dyn ClassificationModel>,
}

impl PredictionStageHandler {
    pub fn new(ctx: StageContext, model: Arc<dyn ClassificationModel>) -> Self {
        Self { ctx, model }
    }

    /// `OCR_COMPLETED` arrives here through the auto-chain rule; treat it as
    /// the prediction request the coordinator says it implies.
    fn requested_kind(&self, envelope: &Envelope) -> Result<MessageKind, HandlerError> {
        match envelope.kind() {
            MessageKind::OcrCompleted => {
                let transition = self
                    .ctx
                    .coordinator()
                    .transition(MessageKind::OcrCompleted, StageOutcome::Succeeded)
                    .map_err(|e| HandlerError::poison(e.to_string()))?;
                match transition {
                    Transition::Advance(kind) => {
                        debug!(
                            correlation_id = %envelope.correlation_id(),
                            "Auto-chaining OCR output into prediction"
                        );
                        Ok(kind)
                    }
                    Transition::Terminal => Err(HandlerError::poison(
                        "OCR output does not chain into prediction",
                    )),
                }
            }
            kind => Ok(kind),
        }
    }
}

impl StageHandler for PredictionStageHandler {
    fn stage(&self) -> Stage {
        Stage::Prediction
    }
}

#[async_trait]
impl MessageHandler for PredictionStageHandler {
    fn name(&self) -> &str {
        Stage::Prediction.as_str()
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.ctx.check_kind(Stage::Prediction, &envelope)?;
        let current = self.requested_kind(&envelope)?;
        let text = envelope.text_field("text")?.to_string();
        let path = envelope.payload().get_str("path").map(str::to_string);

        let predicted = self
            .ctx
            .call(Stage::Prediction, &envelope, self.model.predict(&text))
            .await;

        // A score outside [0, 1] cannot be routed on; it counts as a model error.
        let predicted = predicted.and_then(|prediction| {
            if (0.0..=1.0).contains(&prediction.confidence) {
                Ok(prediction)
            } else {
                Err(CollaboratorError::failed(format!(
                    "confidence {} outside [0, 1]",
                    prediction.confidence
                )))
            }
        });

        let (outcome, payload) = match predicted {
            Ok(prediction) => match self.ctx.coordinator().assess_confidence(prediction.confidence) {
                StageOutcome::Succeeded => (
                    StageOutcome::Succeeded,
                    Payload::new()
                        .with("label", prediction.label)
                        .with("confidence", prediction.confidence)
                        .with("text", text)
                        .with_opt("path", path),
                ),
                _ => {
                    let reason = self
                        .ctx
                        .describe(&["feedback", "low_confidence"], "Low confidence prediction");
                    let threshold = self.ctx.coordinator().confidence_threshold();
                    (
                        StageOutcome::LowConfidence,
                        Payload::new()
                            .with(
                                "reason",
                                format!(
                                    "{reason}: {:.2} below {:.2}",
                                    prediction.confidence, threshold
                                ),
                            )
                            .with("stage", Stage::Prediction.as_str())
                            .with("predicted_label", prediction.label)
                            .with("confidence", prediction.confidence)
                            .with("text", text)
                            .with_opt("path", path),
                    )
                }
            },
            Err(err) => {
                let reason = self
                    .ctx
                    .describe(&["feedback", "prediction_failed"], "Prediction failed");
                (
                    StageOutcome::Failed,
                    Payload::new()
                        .with("reason", format!("{reason}: {err}"))
                        .with("stage", Stage::Prediction.as_str())
                        .with("text", text)
                        .with_opt("path", path),
                )
            }
        };

        self.ctx
            .advance(Stage::Prediction, &envelope, current, outcome, payload)
            .await?;
        Ok(())
    }
}
