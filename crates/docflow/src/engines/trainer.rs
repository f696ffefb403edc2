use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use docflow_pipeline::{CollaboratorError, ModelTrainer};
use docflow_protocol::Sample;

use super::classifier::{KeywordClassifier, KeywordModel};

/// Folds corrected samples into a keyword model and writes it as a new
/// file. With a base classifier, training starts from its active model so
/// earlier corrections are kept.
pub struct KeywordTrainer {
    output_dir: PathBuf,
    base: Option<Arc<KeywordClassifier>>,
}

impl KeywordTrainer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            base: None,
        }
    }

    pub fn with_base(mut self, base: Arc<KeywordClassifier>) -> Self {
        self.base = Some(base);
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl ModelTrainer for KeywordTrainer {
    async fn train(&self, samples: &[Sample]) -> Result<PathBuf, CollaboratorError> {
        let mut model = match &self.base {
            Some(base) => base.snapshot()?,
            None => KeywordModel::default(),
        };
        for sample in samples {
            if sample.label.trim().is_empty() {
                return Err(CollaboratorError::failed(format!(
                    "sample {} has an empty label",
                    sample.correlation_id
                )));
            }
            model.learn(&sample.label, &sample.text);
        }
        let now = Utc::now();
        model.trained_at = Some(now);

        let file_name = format!(
            "model-{}-{}.json",
            now.format("%Y%m%dT%H%M%S"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.output_dir.join(file_name);
        model.save(&path).await?;
        info!(
            model_path = %path.display(),
            samples = samples.len(),
            labels = model.labels.len(),
            "Model trained"
        );
        Ok(path)
    }
}
