//! Document pipeline: coordinator, stage handlers and collaborator contracts.
//!
//! A document enters as `OCR_REQUESTED` and moves through OCR, prediction
//! and, when the model is unsure, human feedback and retraining. Each stage
//! is an independent consumer; the only state shared between them is the
//! correlation id carried on every message.

pub mod collaborators;
pub mod coordinator;
pub mod ingest;
pub mod stages;
pub mod state;

pub use collaborators::{
    describe, with_timeout, ClassificationModel, CollaboratorError, FeedbackStore, ModelActivator,
    ModelTrainer, OcrEngine, Prediction, TextLookup,
};
pub use coordinator::{CoordinatorError, PipelineCoordinator, StageOutcome, Transition};
pub use ingest::{submit_correction, submit_document};
pub use stages::{
    attach, FeedbackStageHandler, ModelUpdateStageHandler, OcrStageHandler,
    PredictionStageHandler, Stage, StageContext, StageHandler, TrainingStageHandler,
};
pub use state::{Journey, JourneyLog, PipelineState, StateMachineError, StateTransition};
