//! Next-step decisions for the pipeline.
//!
//! The coordinator is pure: given the kind a stage just handled and how the
//! stage went, it names the kind to emit next and the queue to send it to.
//! It never touches the bus.

use std::fmt;
use thiserror::Error;

use docflow_protocol::defaults::DEFAULT_CONFIDENCE_THRESHOLD;
use docflow_protocol::{queues, Envelope, MessageKind};

/// How a stage's collaborator call went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    /// Prediction returned a confidence under the threshold.
    LowConfidence,
    Failed,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Succeeded => "succeeded",
            StageOutcome::LowConfidence => "low_confidence",
            StageOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Emit a message of this kind.
    Advance(MessageKind),
    /// The journey ends here; nothing is emitted.
    Terminal,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("no transition from {kind} on outcome {outcome}")]
    NoTransition {
        kind: MessageKind,
        outcome: StageOutcome,
    },

    #[error("confidence threshold must be within [0, 1], got {0}")]
    InvalidThreshold(String),
}

#[derive(Debug, Clone)]
pub struct PipelineCoordinator {
    confidence_threshold: f64,
}

impl Default for PipelineCoordinator {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl PipelineCoordinator {
    pub fn new(confidence_threshold: f64) -> Result<Self, CoordinatorError> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(CoordinatorError::InvalidThreshold(
                confidence_threshold.to_string(),
            ));
        }
        Ok(Self {
            confidence_threshold,
        })
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Predictions at or above the threshold are accepted. NaN never is.
    pub fn assess_confidence(&self, confidence: f64) -> StageOutcome {
        if confidence >= self.confidence_threshold {
            StageOutcome::Succeeded
        } else {
            StageOutcome::LowConfidence
        }
    }

    /// The transition table.
    pub fn transition(
        &self,
        current: MessageKind,
        outcome: StageOutcome,
    ) -> Result<Transition, CoordinatorError> {
        use MessageKind::*;
        use StageOutcome::*;

        let transition = match (current, outcome) {
            (OcrRequested, Succeeded) => Transition::Advance(OcrCompleted),
            (OcrRequested, Failed) => Transition::Advance(FeedbackRequested),
            // OCR output is auto-chained into a prediction request.
            (OcrCompleted, Succeeded) => Transition::Advance(PredictionRequested),
            (PredictionRequested, Succeeded) => Transition::Advance(PredictionCompleted),
            (PredictionRequested, LowConfidence | Failed) => {
                Transition::Advance(FeedbackRequested)
            }
            (FeedbackRequested, Succeeded) => Transition::Advance(FeedbackSubmitted),
            (FeedbackSubmitted, Succeeded) => Transition::Advance(TrainingRequested),
            (TrainingRequested, Succeeded) => Transition::Advance(TrainingCompleted),
            (TrainingRequested, Failed) => Transition::Terminal,
            (PredictionCompleted, _) | (TrainingCompleted, _) => Transition::Terminal,
            (kind, outcome) => return Err(CoordinatorError::NoTransition { kind, outcome }),
        };
        Ok(transition)
    }

    /// Queue a message of `kind` goes to when nobody asked otherwise.
    pub fn default_queue(kind: MessageKind) -> &'static str {
        match kind {
            MessageKind::OcrRequested => queues::OCR_REQUESTS,
            MessageKind::OcrCompleted | MessageKind::PredictionRequested => {
                queues::PREDICTION_REQUESTS
            }
            MessageKind::PredictionCompleted => queues::PREDICTION_RESULTS,
            MessageKind::FeedbackRequested => queues::FEEDBACK_REQUESTS,
            MessageKind::FeedbackSubmitted => queues::FEEDBACK_RESULTS,
            MessageKind::TrainingRequested => queues::TRAINING_REQUESTS,
            MessageKind::TrainingCompleted => queues::TRAINING_RESULTS,
        }
    }

    /// Destination for `next`, emitted while handling `incoming`.
    ///
    /// `reply_to` only redirects the stage's own result. Feedback requests
    /// always go to the feedback queue so a human sees them.
    pub fn destination<'a>(&self, incoming: &'a Envelope, next: MessageKind) -> &'a str {
        match (next, incoming.reply_to()) {
            (MessageKind::FeedbackRequested, _) | (_, None) => Self::default_queue(next),
            (_, Some(queue)) => queue,
        }
    }
}
