use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

use docflow_bus::{HandlerError, MessageHandler};
use docflow_protocol::{Envelope, MessageKind, Payload};

use super::{Stage, StageContext, StageHandler};
use crate::collaborators::ModelTrainer;
use crate::coordinator::StageOutcome;

/// Runs the trainer on a batch of corrected samples.
///
/// A failed run is the end of the journey: it is logged, acknowledged and
/// nothing else is published.
pub struct TrainingStageHandler {
    ctx: StageContext,
    trainer: Arc<dyn ModelTrainer>,
}

impl TrainingStageHandler {
    pub fn new(ctx: StageContext, trainer: Arc<dyn ModelTrainer>) -> Self {
        Self { ctx, trainer }
    }
}

impl StageHandler for TrainingStageHandler {
    fn stage(&self) -> Stage {
        Stage::Training
    }
}

#[async_trait]
impl MessageHandler for TrainingStageHandler {
    fn name(&self) -> &str {
        Stage::Training.as_str()
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.ctx.check_kind(Stage::Training, &envelope)?;
        let samples = envelope.samples()?;
        if samples.is_empty() {
            return Err(HandlerError::poison("training request carries no samples"));
        }

        let trained = self
            .ctx
            .call(Stage::Training, &envelope, self.trainer.train(&samples))
            .await;

        let (outcome, payload) = match trained {
            Ok(model_path) => (
                StageOutcome::Succeeded,
                Payload::new()
                    .with("model_path", model_path.display().to_string())
                    .with("samples", samples.len() as u64),
            ),
            Err(err) => {
                error!(
                    correlation_id = %envelope.correlation_id(),
                    samples = samples.len(),
                    error = %err,
                    "Training failed"
                );
                (StageOutcome::Failed, Payload::new())
            }
        };

        self.ctx
            .advance(Stage::Training, &envelope, MessageKind::TrainingRequested, outcome, payload)
            .await?;
        Ok(())
    }
}
