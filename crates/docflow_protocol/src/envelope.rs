//! The message envelope and its JSON wire codec.
//!
//! Wire format (one JSON object per message):
//! ```text
//! {"kind": "OCR_REQUESTED", "correlation_id": "doc-1",
//!  "payload": {"path": "/x.png"}, "reply_to": "prediction.requests"}
//! ```
//! Unknown top-level and payload fields are ignored on decode. A missing or
//! mistyped required field for the declared kind is a decode error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{ProtocolError, Result};
use crate::ids::CorrelationId;
use crate::kind::MessageKind;

/// Kind-specific key/value body of an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert `value` only when present.
    pub fn with_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.with(key, value),
            None => self,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.0.get(key).and_then(Value::as_array)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().collect())
    }
}

/// One labelled training example, carried in `TrainingRequested.samples`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub text: String,
    pub label: String,
}

/// A validated pipeline message.
///
/// Fields are private so an envelope can only exist with the payload its
/// kind requires.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    kind: MessageKind,
    correlation_id: CorrelationId,
    payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
}

impl Envelope {
    /// Build an envelope, checking the payload against `kind`.
    pub fn new(kind: MessageKind, correlation_id: CorrelationId, payload: Payload) -> Result<Self> {
        validate_payload(kind, &payload)?;
        Ok(Self {
            kind,
            correlation_id,
            payload,
            reply_to: None,
        })
    }

    /// Entry point of a document's journey.
    pub fn ocr_requested(correlation_id: CorrelationId, path: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::OcrRequested,
            correlation_id,
            payload: Payload::new().with("path", path.into()),
            reply_to: None,
        }
    }

    /// A human correction, as produced by a feedback UI.
    pub fn feedback_submitted(
        correlation_id: CorrelationId,
        label: impl Into<String>,
        text: Option<String>,
    ) -> Self {
        Self {
            kind: MessageKind::FeedbackSubmitted,
            correlation_id,
            payload: Payload::new()
                .with("label", label.into())
                .with_opt("text", text),
            reply_to: None,
        }
    }

    /// Next message of the same journey. The correlation id is copied, never
    /// supplied, so it cannot drift between stages.
    pub fn follow_up(&self, kind: MessageKind, payload: Payload) -> Result<Self> {
        Self::new(kind, self.correlation_id.clone(), payload)
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Required string field. Validation at construction guarantees presence
    /// for the kind's own required fields; other keys may be absent.
    pub fn text_field(&self, key: &'static str) -> Result<&str> {
        self.payload
            .get_str(key)
            .ok_or(ProtocolError::MissingField {
                kind: self.kind,
                field: key,
            })
    }

    /// Decode `TrainingRequested.samples`.
    pub fn samples(&self) -> Result<Vec<Sample>> {
        let values = self.payload.get_array("samples").ok_or(ProtocolError::MissingField {
            kind: self.kind,
            field: "samples",
        })?;
        values
            .iter()
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|_| ProtocolError::InvalidField {
                    kind: self.kind,
                    field: "samples",
                    expected: "an array of {correlation_id, text, label} objects",
                })
            })
            .collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        raw.into_envelope()
    }
}

/// Best-effort correlation id of an undecodable message, for dead-letter logs.
pub fn peek_correlation_id(bytes: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    value
        .get("correlation_id")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Deserialize)]
struct RawEnvelope {
    kind: Option<String>,
    correlation_id: Option<String>,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
    #[serde(default)]
    reply_to: Option<String>,
}

impl RawEnvelope {
    fn into_envelope(self) -> Result<Envelope> {
        let kind: MessageKind = self
            .kind
            .ok_or_else(|| ProtocolError::Malformed("missing 'kind'".to_string()))?
            .parse()?;
        let correlation_id = CorrelationId::parse(self.correlation_id.as_deref().unwrap_or(""))?;
        let payload = Payload::from(self.payload.unwrap_or_default());
        let envelope = Envelope::new(kind, correlation_id, payload)?;
        Ok(match self.reply_to.filter(|queue| !queue.trim().is_empty()) {
            Some(queue) => envelope.with_reply_to(queue),
            None => envelope,
        })
    }
}

fn validate_payload(kind: MessageKind, payload: &Payload) -> Result<()> {
    for requirement in kind.required_fields() {
        let value = payload.get(requirement.name).ok_or(ProtocolError::MissingField {
            kind,
            field: requirement.name,
        })?;
        if !requirement.ty.matches(value) {
            return Err(ProtocolError::InvalidField {
                kind,
                field: requirement.name,
                expected: requirement.ty.describe(),
            });
        }
    }
    Ok(())
}
