use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use docflow_pipeline::{CollaboratorError, FeedbackStore};
use docflow_protocol::CorrelationId;

/// One line of the corrections file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub correlation_id: CorrelationId,
    pub label: String,
    pub recorded_at: DateTime<Utc>,
}

/// Appends corrections to a JSON-lines file.
pub struct JsonlFeedbackStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFeedbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every correction recorded so far, oldest first.
    pub async fn corrections(&self) -> Result<Vec<Correction>, CollaboratorError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CollaboratorError::failed(e.to_string())),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| CollaboratorError::failed(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl FeedbackStore for JsonlFeedbackStore {
    async fn save_correction(
        &self,
        correlation_id: &CorrelationId,
        label: &str,
    ) -> Result<(), CollaboratorError> {
        let record = Correction {
            correlation_id: correlation_id.clone(),
            label: label.to_string(),
            recorded_at: Utc::now(),
        };
        let mut line =
            serde_json::to_vec(&record).map_err(|e| CollaboratorError::failed(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                CollaboratorError::failed(format!("cannot open {}: {}", self.path.display(), e))
            })?;
        file.write_all(&line)
            .await
            .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        Ok(())
    }
}
