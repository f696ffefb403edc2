use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use docflow_bus::{HandlerError, MessageHandler};
use docflow_protocol::{Envelope, MessageKind, Payload};

use super::{Stage, StageContext, StageHandler};
use crate::collaborators::OcrEngine;
use crate::coordinator::StageOutcome;

/// Turns `OCR_REQUESTED` into `OCR_COMPLETED`, or into a feedback request
/// when the engine fails.
pub struct OcrStageHandler {
    ctx: StageContext,
    engine: Arc<dyn OcrEngine>,
}

impl OcrStageHandler {
    pub fn new(ctx: StageContext, engine: Arc<dyn OcrEngine>) -> Self {
        Self { ctx, engine }
    }
}

impl StageHandler for OcrStageHandler {
    fn stage(&self) -> Stage {
        Stage::Ocr
    }
}

#[async_trait]
impl MessageHandler for OcrStageHandler {
    fn name(&self) -> &str {
        Stage::Ocr.as_str()
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.ctx.check_kind(Stage::Ocr, &envelope)?;
        let path = envelope.text_field("path")?.to_string();

        let extracted = self
            .ctx
            .call(Stage::Ocr, &envelope, self.engine.extract_text(Path::new(&path)))
            .await;

        let (outcome, payload) = match extracted {
            Ok(text) => (
                StageOutcome::Succeeded,
                Payload::new().with("text", text).with("path", path),
            ),
            Err(err) => {
                let reason = self
                    .ctx
                    .describe(&["feedback", "ocr_failed"], "OCR failed");
                (
                    StageOutcome::Failed,
                    Payload::new()
                        .with("reason", format!("{reason}: {err}"))
                        .with("stage", Stage::Ocr.as_str())
                        .with("path", path),
                )
            }
        };

        self.ctx
            .advance(Stage::Ocr, &envelope, MessageKind::OcrRequested, outcome, payload)
            .await?;
        Ok(())
    }
}
