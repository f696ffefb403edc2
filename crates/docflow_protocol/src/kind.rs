//! Message kinds and the payload fields each kind must carry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Type tag of an [`crate::Envelope`].
///
/// Serialized as SCREAMING_SNAKE_CASE (`OCR_REQUESTED`); these strings are
/// part of the wire contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    OcrRequested,
    OcrCompleted,
    PredictionRequested,
    PredictionCompleted,
    FeedbackRequested,
    FeedbackSubmitted,
    TrainingRequested,
    TrainingCompleted,
}

/// JSON shape a payload field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    List,
}

impl FieldType {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldType::Text => "a string",
            FieldType::Number => "a number",
            FieldType::List => "an array",
        }
    }

    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldType::Text => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::List => value.is_array(),
        }
    }
}

/// A payload field that must be present for a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRequirement {
    pub name: &'static str,
    pub ty: FieldType,
}

const fn field(name: &'static str, ty: FieldType) -> FieldRequirement {
    FieldRequirement { name, ty }
}

const OCR_REQUESTED_FIELDS: &[FieldRequirement] = &[field("path", FieldType::Text)];
const OCR_COMPLETED_FIELDS: &[FieldRequirement] = &[field("text", FieldType::Text)];
const PREDICTION_REQUESTED_FIELDS: &[FieldRequirement] = &[field("text", FieldType::Text)];
const PREDICTION_COMPLETED_FIELDS: &[FieldRequirement] = &[
    field("label", FieldType::Text),
    field("confidence", FieldType::Number),
];
const FEEDBACK_REQUESTED_FIELDS: &[FieldRequirement] = &[field("reason", FieldType::Text)];
const FEEDBACK_SUBMITTED_FIELDS: &[FieldRequirement] = &[field("label", FieldType::Text)];
const TRAINING_REQUESTED_FIELDS: &[FieldRequirement] = &[field("samples", FieldType::List)];
const TRAINING_COMPLETED_FIELDS: &[FieldRequirement] = &[field("model_path", FieldType::Text)];

impl MessageKind {
    pub const ALL: &'static [MessageKind] = &[
        MessageKind::OcrRequested,
        MessageKind::OcrCompleted,
        MessageKind::PredictionRequested,
        MessageKind::PredictionCompleted,
        MessageKind::FeedbackRequested,
        MessageKind::FeedbackSubmitted,
        MessageKind::TrainingRequested,
        MessageKind::TrainingCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::OcrRequested => "OCR_REQUESTED",
            MessageKind::OcrCompleted => "OCR_COMPLETED",
            MessageKind::PredictionRequested => "PREDICTION_REQUESTED",
            MessageKind::PredictionCompleted => "PREDICTION_COMPLETED",
            MessageKind::FeedbackRequested => "FEEDBACK_REQUESTED",
            MessageKind::FeedbackSubmitted => "FEEDBACK_SUBMITTED",
            MessageKind::TrainingRequested => "TRAINING_REQUESTED",
            MessageKind::TrainingCompleted => "TRAINING_COMPLETED",
        }
    }

    /// Fields the consuming stage relies on. Envelopes lacking any of them
    /// cannot be constructed or decoded.
    pub fn required_fields(&self) -> &'static [FieldRequirement] {
        match self {
            MessageKind::OcrRequested => OCR_REQUESTED_FIELDS,
            MessageKind::OcrCompleted => OCR_COMPLETED_FIELDS,
            MessageKind::PredictionRequested => PREDICTION_REQUESTED_FIELDS,
            MessageKind::PredictionCompleted => PREDICTION_COMPLETED_FIELDS,
            MessageKind::FeedbackRequested => FEEDBACK_REQUESTED_FIELDS,
            MessageKind::FeedbackSubmitted => FEEDBACK_SUBMITTED_FIELDS,
            MessageKind::TrainingRequested => TRAINING_REQUESTED_FIELDS,
            MessageKind::TrainingCompleted => TRAINING_COMPLETED_FIELDS,
        }
    }

    /// `PredictionCompleted` and `TrainingCompleted` end a document's cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageKind::PredictionCompleted | MessageKind::TrainingCompleted
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_string()))
    }
}
