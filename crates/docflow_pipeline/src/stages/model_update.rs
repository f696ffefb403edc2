use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use docflow_bus::{HandlerError, MessageHandler};
use docflow_protocol::{Envelope, MessageKind, Payload};

use super::{Stage, StageContext, StageHandler};
use crate::collaborators::ModelActivator;
use crate::coordinator::StageOutcome;

/// Swaps a freshly trained model into service.
pub struct ModelUpdateStageHandler {
    ctx: StageContext,
    activator: Arc<dyn ModelActivator>,
}

impl ModelUpdateStageHandler {
    pub fn new(ctx: StageContext, activator: Arc<dyn ModelActivator>) -> Self {
        Self { ctx, activator }
    }
}

impl StageHandler for ModelUpdateStageHandler {
    fn stage(&self) -> Stage {
        Stage::ModelUpdate
    }
}

#[async_trait]
impl MessageHandler for ModelUpdateStageHandler {
    fn name(&self) -> &str {
        Stage::ModelUpdate.as_str()
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.ctx.check_kind(Stage::ModelUpdate, &envelope)?;
        let model_path = envelope.text_field("model_path")?;

        let activated = self
            .ctx
            .call(
                Stage::ModelUpdate,
                &envelope,
                self.activator.activate(Path::new(model_path)),
            )
            .await;
        let outcome = match activated {
            Ok(()) => {
                info!(
                    correlation_id = %envelope.correlation_id(),
                    model_path,
                    "Model activated"
                );
                StageOutcome::Succeeded
            }
            Err(err) => {
                error!(
                    correlation_id = %envelope.correlation_id(),
                    model_path,
                    error = %err,
                    "Model activation failed"
                );
                StageOutcome::Failed
            }
        };

        self.ctx
            .advance(
                Stage::ModelUpdate,
                &envelope,
                MessageKind::TrainingCompleted,
                outcome,
                Payload::new(),
            )
            .await?;
        Ok(())
    }
}
