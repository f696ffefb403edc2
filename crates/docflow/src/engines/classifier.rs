//! Keyword classifier.
//!
//! A model is a JSON file mapping each label to the keywords that vote for
//! it. The classifier holds the active model behind a lock so a retrained
//! model can be swapped in while predictions keep running.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

use docflow_pipeline::{ClassificationModel, CollaboratorError, ModelActivator, Prediction};

/// Label assigned when no keyword matches.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordModel {
    /// label -> lowercase keywords
    pub labels: BTreeMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub samples: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
}

impl KeywordModel {
    pub async fn load(path: &Path) -> Result<Self, CollaboratorError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            CollaboratorError::failed(format!("cannot read model {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            CollaboratorError::failed(format!("invalid model {}: {}", path.display(), e))
        })
    }

    pub async fn save(&self, path: &Path) -> Result<(), CollaboratorError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CollaboratorError::failed(e.to_string()))?;
        tokio::fs::write(path, json).await.map_err(|e| {
            CollaboratorError::failed(format!("cannot write model {}: {}", path.display(), e))
        })
    }

    /// Add every keyword of `text` as a vote for `label`.
    pub fn learn(&mut self, label: &str, text: &str) {
        let keywords = self.labels.entry(label.to_string()).or_default();
        keywords.extend(tokenize(text));
        self.samples += 1;
    }

    /// Best label by keyword hits; confidence is its share of all hits.
    pub fn predict(&self, text: &str) -> Prediction {
        let tokens: BTreeSet<String> = tokenize(text).collect();
        let mut best: Option<(&str, usize)> = None;
        let mut total = 0usize;
        for (label, keywords) in &self.labels {
            let hits = keywords.intersection(&tokens).count();
            total += hits;
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((label.as_str(), hits));
            }
        }
        match best {
            Some((label, hits)) => Prediction {
                label: label.to_string(),
                confidence: hits as f64 / total as f64,
            },
            None => Prediction {
                label: UNKNOWN_LABEL.to_string(),
                confidence: 0.0,
            },
        }
    }
}

/// Lowercase alphanumeric words of three characters or more.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 3)
        .map(str::to_lowercase)
}

pub struct KeywordClassifier {
    model: RwLock<KeywordModel>,
    source: RwLock<Option<PathBuf>>,
}

impl KeywordClassifier {
    pub fn new(model: KeywordModel) -> Self {
        Self {
            model: RwLock::new(model),
            source: RwLock::new(None),
        }
    }

    /// Load `path`, or start empty when it does not exist yet.
    pub async fn open(path: &Path) -> Result<Self, CollaboratorError> {
        if !path.exists() {
            info!(path = %path.display(), "No model yet, starting with an empty one");
            return Ok(Self::new(KeywordModel::default()));
        }
        let classifier = Self::new(KeywordModel::load(path).await?);
        classifier.set_source(path);
        Ok(classifier)
    }

    /// Copy of the active model.
    pub fn snapshot(&self) -> Result<KeywordModel, CollaboratorError> {
        self.model
            .read()
            .map(|model| model.clone())
            .map_err(|_| CollaboratorError::failed("classifier model lock poisoned"))
    }

    /// File the active model came from.
    pub fn source(&self) -> Option<PathBuf> {
        self.source.read().ok().and_then(|source| source.clone())
    }

    fn set_source(&self, path: &Path) {
        if let Ok(mut source) = self.source.write() {
            *source = Some(path.to_path_buf());
        }
    }
}

#[async_trait]
impl ClassificationModel for KeywordClassifier {
    async fn predict(&self, text: &str) -> Result<Prediction, CollaboratorError> {
        let model = self
            .model
            .read()
            .map_err(|_| CollaboratorError::failed("classifier model lock poisoned"))?;
        Ok(model.predict(text))
    }
}

#[async_trait]
impl ModelActivator for KeywordClassifier {
    async fn activate(&self, model_path: &Path) -> Result<(), CollaboratorError> {
        let fresh = KeywordModel::load(model_path).await?;
        let labels = fresh.labels.len();
        {
            let mut model = self
                .model
                .write()
                .map_err(|_| CollaboratorError::failed("classifier model lock poisoned"))?;
            *model = fresh;
        }
        self.set_source(model_path);
        info!(model_path = %model_path.display(), labels, "Classifier model swapped");
        Ok(())
    }
}
