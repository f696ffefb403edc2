//! Per-document pipeline state.
//!
//! State is never stored as one object; it is inferred from the kind of the
//! last message seen for a correlation id. [`Journey`] replays that inference
//! and rejects anything that would move a document backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use thiserror::Error;

use docflow_protocol::{CorrelationId, Envelope, MessageKind};

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineState {
    Ingested,
    OcrInFlight,
    OcrDone,
    PredictionInFlight,
    PredictionDone,
    /// Prediction accepted; end of the cycle.
    Confirmed,
    FeedbackPending,
    FeedbackDone,
    TrainingInFlight,
    TrainingDone,
    /// Training collaborator failed; logged, nothing further is emitted.
    TrainingFailed,
}

impl PipelineState {
    pub const ALL: &'static [PipelineState] = &[
        PipelineState::Ingested,
        PipelineState::OcrInFlight,
        PipelineState::OcrDone,
        PipelineState::PredictionInFlight,
        PipelineState::PredictionDone,
        PipelineState::Confirmed,
        PipelineState::FeedbackPending,
        PipelineState::FeedbackDone,
        PipelineState::TrainingInFlight,
        PipelineState::TrainingDone,
        PipelineState::TrainingFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Ingested => "INGESTED",
            PipelineState::OcrInFlight => "OCR_IN_FLIGHT",
            PipelineState::OcrDone => "OCR_DONE",
            PipelineState::PredictionInFlight => "PREDICTION_IN_FLIGHT",
            PipelineState::PredictionDone => "PREDICTION_DONE",
            PipelineState::Confirmed => "CONFIRMED",
            PipelineState::FeedbackPending => "FEEDBACK_PENDING",
            PipelineState::FeedbackDone => "FEEDBACK_DONE",
            PipelineState::TrainingInFlight => "TRAINING_IN_FLIGHT",
            PipelineState::TrainingDone => "TRAINING_DONE",
            PipelineState::TrainingFailed => "TRAINING_FAILED",
        }
    }

    /// State a document is in once a message of `kind` has been published.
    pub fn after(kind: MessageKind) -> PipelineState {
        match kind {
            MessageKind::OcrRequested => PipelineState::OcrInFlight,
            MessageKind::OcrCompleted => PipelineState::OcrDone,
            MessageKind::PredictionRequested => PipelineState::PredictionInFlight,
            MessageKind::PredictionCompleted => PipelineState::Confirmed,
            MessageKind::FeedbackRequested => PipelineState::FeedbackPending,
            MessageKind::FeedbackSubmitted => PipelineState::FeedbackDone,
            MessageKind::TrainingRequested => PipelineState::TrainingInFlight,
            MessageKind::TrainingCompleted => PipelineState::TrainingDone,
        }
    }

    /// Valid single-step transitions.
    ///
    /// The feedback branch is entered from OCR or prediction failure and
    /// from a low-confidence prediction.
    pub fn valid_transitions(&self) -> &'static [PipelineState] {
        match self {
            PipelineState::Ingested => &[PipelineState::OcrInFlight],
            PipelineState::OcrInFlight => &[PipelineState::OcrDone, PipelineState::FeedbackPending],
            PipelineState::OcrDone => &[PipelineState::PredictionInFlight],
            PipelineState::PredictionInFlight => {
                &[PipelineState::PredictionDone, PipelineState::FeedbackPending]
            }
            PipelineState::PredictionDone => {
                &[PipelineState::Confirmed, PipelineState::FeedbackPending]
            }
            PipelineState::FeedbackPending => &[PipelineState::FeedbackDone],
            PipelineState::FeedbackDone => &[PipelineState::TrainingInFlight],
            PipelineState::TrainingInFlight => {
                &[PipelineState::TrainingDone, PipelineState::TrainingFailed]
            }
            PipelineState::Confirmed | PipelineState::TrainingDone | PipelineState::TrainingFailed => &[],
        }
    }

    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Shortest forward path to `target`, excluding `self`. `None` when
    /// `target` is not ahead of `self`.
    pub fn path_to(&self, target: PipelineState) -> Option<Vec<PipelineState>> {
        let mut previous: HashMap<PipelineState, PipelineState> = HashMap::new();
        let mut queue = VecDeque::from([*self]);
        while let Some(state) = queue.pop_front() {
            for &next in state.valid_transitions() {
                if next == *self || previous.contains_key(&next) {
                    continue;
                }
                previous.insert(next, state);
                if next == target {
                    let mut path = vec![target];
                    let mut cursor = target;
                    while let Some(&prev) = previous.get(&cursor) {
                        if prev == *self {
                            break;
                        }
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    pub fn can_reach(&self, target: PipelineState) -> bool {
        self.path_to(target).is_some()
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// State Transition
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: PipelineState,
    pub to: PipelineState,
    pub timestamp: DateTime<Utc>,
    /// Message kind that caused the step, when observed from the bus.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<MessageKind>,
}

impl StateTransition {
    pub fn new(from: PipelineState, to: PipelineState) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            trigger: None,
        }
    }

    pub fn with_trigger(mut self, kind: MessageKind) -> Self {
        self.trigger = Some(kind);
        self
    }
}

#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("state is terminal: {0}")]
    TerminalState(PipelineState),
}

// ============================================================================
// Journey
// ============================================================================

/// State machine for one correlation id.
#[derive(Debug)]
pub struct Journey {
    correlation_id: CorrelationId,
    current: PipelineState,
    history: Vec<StateTransition>,
}

impl Journey {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            current: PipelineState::Ingested,
            history: Vec::new(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn current(&self) -> PipelineState {
        self.current
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Single-step transition.
    pub fn transition(&mut self, to: PipelineState) -> Result<StateTransition, StateMachineError> {
        if self.current.is_terminal() {
            return Err(StateMachineError::TerminalState(self.current));
        }
        if !self.current.can_transition_to(to) {
            return Err(StateMachineError::InvalidTransition {
                from: self.current,
                to,
            });
        }
        let transition = StateTransition::new(self.current, to);
        self.current = to;
        self.history.push(transition.clone());
        Ok(transition)
    }

    /// Advance to the state implied by a message of `kind`, stepping through
    /// intermediate states. A repeat of the current state (redelivery) is a
    /// no-op.
    pub fn observe(&mut self, kind: MessageKind) -> Result<&[StateTransition], StateMachineError> {
        let target = PipelineState::after(kind);
        let start = self.history.len();
        if target == self.current {
            return Ok(&self.history[start..]);
        }
        if self.current.is_terminal() {
            return Err(StateMachineError::TerminalState(self.current));
        }
        let path = self
            .current
            .path_to(target)
            .ok_or(StateMachineError::InvalidTransition {
                from: self.current,
                to: target,
            })?;
        for state in path {
            let transition = StateTransition::new(self.current, state).with_trigger(kind);
            self.current = state;
            self.history.push(transition);
        }
        Ok(&self.history[start..])
    }

    /// Record a failed training run, which emits no message.
    pub fn fail_training(&mut self) -> Result<StateTransition, StateMachineError> {
        self.transition(PipelineState::TrainingFailed)
    }
}

/// Journeys of every correlation id seen on the bus.
#[derive(Debug, Default)]
pub struct JourneyLog {
    journeys: HashMap<CorrelationId, Journey>,
}

impl JourneyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, envelope: &Envelope) -> Result<PipelineState, StateMachineError> {
        let journey = self
            .journeys
            .entry(envelope.correlation_id().clone())
            .or_insert_with(|| Journey::new(envelope.correlation_id().clone()));
        journey.observe(envelope.kind())?;
        Ok(journey.current())
    }

    pub fn get(&self, correlation_id: &CorrelationId) -> Option<&Journey> {
        self.journeys.get(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.journeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journeys.is_empty()
    }
}
