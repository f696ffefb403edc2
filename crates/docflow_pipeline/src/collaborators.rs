//! External collaborators the stages call out to.
//!
//! Stages only see these traits. Concrete engines are supplied at startup
//! and may be swapped freely.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use docflow_protocol::{CorrelationId, Sample};

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CollaboratorError {
    pub fn failed(message: impl Into<String>) -> Self {
        CollaboratorError::Failed(message.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CollaboratorError::Timeout(_))
    }
}

/// Label chosen by a classifier and how sure it is, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract_text(&self, path: &Path) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait ClassificationModel: Send + Sync {
    async fn predict(&self, text: &str) -> Result<Prediction, CollaboratorError>;
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn save_correction(
        &self,
        correlation_id: &CorrelationId,
        label: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait ModelTrainer: Send + Sync {
    /// Train on `samples` and return where the new model was written.
    async fn train(&self, samples: &[Sample]) -> Result<PathBuf, CollaboratorError>;
}

/// Puts a freshly trained model into service.
#[async_trait]
pub trait ModelActivator: Send + Sync {
    async fn activate(&self, model_path: &Path) -> Result<(), CollaboratorError>;
}

/// Human-readable strings by dotted path, e.g. `["feedback", "low_confidence"]`.
pub trait TextLookup: Send + Sync {
    fn resolve(&self, path: &[&str]) -> Result<String, CollaboratorError>;
}

/// Resolve `path`, falling back to `fallback` when there is no lookup or no
/// entry.
pub fn describe(lookup: Option<&dyn TextLookup>, path: &[&str], fallback: &str) -> String {
    lookup
        .and_then(|lookup| lookup.resolve(path).ok())
        .unwrap_or_else(|| fallback.to_string())
}

/// Run a collaborator call under a deadline.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(timeout)),
    }
}
