//! Stage handlers.
//!
//! Every stage follows the same contract: check the kind, call one
//! collaborator under a deadline, ask the coordinator what comes next and
//! publish it. Collaborator failures become domain transitions, not
//! redeliveries, except where a stage has no failure branch.

mod feedback;
mod model_update;
mod ocr;
mod prediction;
mod training;

pub use feedback::FeedbackStageHandler;
pub use model_update::ModelUpdateStageHandler;
pub use ocr::OcrStageHandler;
pub use prediction::PredictionStageHandler;
pub use training::TrainingStageHandler;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use docflow_bus::{publish_with_retry, BusError, HandlerError, MessageBusAdapter, MessageHandler, RetryPolicy};
use docflow_protocol::defaults::DEFAULT_STAGE_TIMEOUT_SECS;
use docflow_protocol::{queues, Envelope, MessageKind, Payload};

use crate::collaborators::{self, CollaboratorError, TextLookup};
use crate::coordinator::{PipelineCoordinator, StageOutcome, Transition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Ocr,
    Prediction,
    Feedback,
    Training,
    ModelUpdate,
}

impl Stage {
    pub const ALL: &'static [Stage] = &[
        Stage::Ocr,
        Stage::Prediction,
        Stage::Feedback,
        Stage::Training,
        Stage::ModelUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ocr => "ocr",
            Stage::Prediction => "prediction",
            Stage::Feedback => "feedback",
            Stage::Training => "training",
            Stage::ModelUpdate => "model_update",
        }
    }

    /// Queue this stage consumes.
    pub fn input_queue(&self) -> &'static str {
        match self {
            Stage::Ocr => queues::OCR_REQUESTS,
            Stage::Prediction => queues::PREDICTION_REQUESTS,
            Stage::Feedback => queues::FEEDBACK_RESULTS,
            Stage::Training => queues::TRAINING_REQUESTS,
            Stage::ModelUpdate => queues::TRAINING_RESULTS,
        }
    }

    /// Kinds this stage accepts; anything else on its queue is poison.
    pub fn accepts(&self) -> &'static [MessageKind] {
        match self {
            Stage::Ocr => &[MessageKind::OcrRequested],
            Stage::Prediction => &[MessageKind::OcrCompleted, MessageKind::PredictionRequested],
            Stage::Feedback => &[MessageKind::FeedbackSubmitted],
            Stage::Training => &[MessageKind::TrainingRequested],
            Stage::ModelUpdate => &[MessageKind::TrainingCompleted],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A [`MessageHandler`] bound to one pipeline stage.
pub trait StageHandler: MessageHandler {
    fn stage(&self) -> Stage;
}

/// Subscribe `handler` to its stage's input queue.
pub async fn attach<H>(bus: &MessageBusAdapter, handler: Arc<H>) -> Result<(), BusError>
where
    H: StageHandler + 'static,
{
    let queue = handler.stage().input_queue();
    bus.consume(queue, handler).await
}

/// Everything a stage needs besides its collaborator.
#[derive(Clone)]
pub struct StageContext {
    bus: Arc<MessageBusAdapter>,
    coordinator: Arc<PipelineCoordinator>,
    lookup: Option<Arc<dyn TextLookup>>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl StageContext {
    pub fn new(bus: Arc<MessageBusAdapter>, coordinator: Arc<PipelineCoordinator>) -> Self {
        Self {
            bus,
            coordinator,
            lookup: None,
            timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn TextLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn bus(&self) -> &MessageBusAdapter {
        &self.bus
    }

    pub fn coordinator(&self) -> &PipelineCoordinator {
        &self.coordinator
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn check_kind(&self, stage: Stage, envelope: &Envelope) -> Result<(), HandlerError> {
        if stage.accepts().contains(&envelope.kind()) {
            Ok(())
        } else {
            Err(HandlerError::poison(format!(
                "{} stage does not handle {}",
                stage,
                envelope.kind()
            )))
        }
    }

    /// Call a collaborator under the stage deadline.
    pub(crate) async fn call<T, F>(
        &self,
        stage: Stage,
        envelope: &Envelope,
        call: F,
    ) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let result = collaborators::with_timeout(self.timeout, call).await;
        if let Err(err) = &result {
            if err.is_timeout() {
                self.bus.metrics().inc_handler_timeouts();
            }
            warn!(
                stage = stage.as_str(),
                correlation_id = %envelope.correlation_id(),
                error = %err,
                "Collaborator call failed"
            );
        }
        result
    }

    pub(crate) fn describe(&self, path: &[&str], fallback: &str) -> String {
        collaborators::describe(self.lookup.as_deref(), path, fallback)
    }

    /// Consult the coordinator and publish whatever comes next.
    ///
    /// Returns the kind emitted, or `None` when the journey ended.
    pub(crate) async fn advance(
        &self,
        stage: Stage,
        incoming: &Envelope,
        current: MessageKind,
        outcome: StageOutcome,
        payload: Payload,
    ) -> Result<Option<MessageKind>, HandlerError> {
        let transition = self
            .coordinator
            .transition(current, outcome)
            .map_err(|e| HandlerError::poison(e.to_string()))?;
        let next = match transition {
            Transition::Advance(next) => next,
            Transition::Terminal => {
                info!(
                    stage = stage.as_str(),
                    correlation_id = %incoming.correlation_id(),
                    from = %current,
                    outcome = %outcome,
                    "Journey ended"
                );
                return Ok(None);
            }
        };

        let message = incoming.follow_up(next, payload)?;
        let queue = self.coordinator.destination(incoming, next);
        if let Err(err) = publish_with_retry(&self.bus, queue, &message, self.retry).await {
            error!(
                stage = stage.as_str(),
                correlation_id = %incoming.correlation_id(),
                queue,
                kind = %next,
                error = %err,
                "Could not publish next message"
            );
            return Err(err.into());
        }
        info!(
            stage = stage.as_str(),
            correlation_id = %incoming.correlation_id(),
            from = %current,
            to = %next,
            outcome = %outcome,
            queue,
            "Stage transition"
        );
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stages_consume_distinct_queues() {
        let queues: HashSet<&str> = Stage::ALL.iter().map(|s| s.input_queue()).collect();
        assert_eq!(queues.len(), Stage::ALL.len());
    }

    #[test]
    fn test_every_consumed_kind_is_routed_to_its_stage() {
        for stage in Stage::ALL {
            for kind in stage.accepts() {
                assert_eq!(
                    PipelineCoordinator::default_queue(*kind),
                    stage.input_queue(),
                    "{kind} would never reach the {stage} stage"
                );
            }
        }
    }
}
