//! Message catalog backed by a TOML file.
//!
//! ```toml
//! [en.feedback]
//! ocr_failed = "OCR could not read the document"
//!
//! [ko.feedback]
//! ocr_failed = "문서를 읽을 수 없습니다"
//! ```
//!
//! Paths are looked up under the active language first, then under the
//! fallback language.

use anyhow::{Context, Result};
use std::path::Path;

use docflow_pipeline::{CollaboratorError, TextLookup};

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone)]
pub struct CatalogTextLookup {
    catalog: toml::Table,
    language: String,
    fallback: String,
}

impl CatalogTextLookup {
    pub fn from_toml_str(text: &str, language: &str, fallback: &str) -> Result<Self> {
        let catalog: toml::Table = toml::from_str(text).context("Invalid message catalog")?;
        Ok(Self {
            catalog,
            language: language.to_string(),
            fallback: fallback.to_string(),
        })
    }

    pub fn from_file(path: &Path, language: &str, fallback: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read message catalog {}", path.display()))?;
        Self::from_toml_str(&text, language, fallback)
            .with_context(|| format!("Failed to load message catalog {}", path.display()))
    }

    /// Catalog with the built-in English strings.
    pub fn builtin() -> Self {
        Self {
            catalog: builtin_catalog(),
            language: DEFAULT_LANGUAGE.to_string(),
            fallback: DEFAULT_LANGUAGE.to_string(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn lookup_in(&self, language: &str, path: &[&str]) -> Option<String> {
        let mut value = self.catalog.get(language)?;
        for key in path {
            value = value.as_table()?.get(*key)?;
        }
        value.as_str().map(str::to_string)
    }
}

impl TextLookup for CatalogTextLookup {
    fn resolve(&self, path: &[&str]) -> Result<String, CollaboratorError> {
        self.lookup_in(&self.language, path)
            .or_else(|| self.lookup_in(&self.fallback, path))
            .ok_or_else(|| CollaboratorError::NotFound(path.join(".")))
    }
}

fn builtin_catalog() -> toml::Table {
    let mut feedback = toml::Table::new();
    for (key, text) in [
        ("ocr_failed", "OCR failed, please review the document"),
        ("low_confidence", "Prediction needs confirmation"),
        ("prediction_failed", "Prediction failed, please label the document"),
    ] {
        feedback.insert(key.to_string(), toml::Value::String(text.to_string()));
    }
    let mut en = toml::Table::new();
    en.insert("feedback".to_string(), toml::Value::Table(feedback));
    let mut catalog = toml::Table::new();
    catalog.insert(DEFAULT_LANGUAGE.to_string(), toml::Value::Table(en));
    catalog
}
