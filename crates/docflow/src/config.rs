//! Runtime configuration.
//!
//! One or more TOML files are layered in order: tables merge key by key,
//! everything else (including the `[[managers]]` array) is replaced by the
//! later file. Missing sections fall back to the defaults in
//! `docflow_protocol::defaults`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docflow_bus::{BusConfig, RetryPolicy};
use docflow_protocol::defaults::*;
use docflow_registry::ManagerSpec;

use crate::error::HelpfulError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSection {
    pub url: String,
    pub prefetch: u16,
    pub max_redeliveries: u32,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_BROKER_URL.to_string(),
            prefetch: DEFAULT_PREFETCH,
            max_redeliveries: DEFAULT_MAX_REDELIVERIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineSection {
    pub confidence_threshold: f64,
    pub stage_timeout_secs: u64,
    pub publish_retries: u32,
    pub publish_retry_base_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            publish_retries: DEFAULT_PUBLISH_RETRIES,
            publish_retry_base_ms: DEFAULT_PUBLISH_RETRY_BASE_MS,
        }
    }
}

impl PipelineSection {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish_retries.max(1),
            base_delay_ms: self.publish_retry_base_ms,
            ..RetryPolicy::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    broker: BrokerSection,
    pipeline: PipelineSection,
    managers: Vec<ManagerSpec>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub broker: BrokerSection,
    pub pipeline: PipelineSection,
    /// Registration order. Empty means "use the built-in pipeline".
    pub managers: Vec<ManagerSpec>,
    /// Files that were merged, in order.
    pub sources: Vec<PathBuf>,
    merged: toml::Value,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerSection::default(),
            pipeline: PipelineSection::default(),
            managers: Vec::new(),
            sources: Vec::new(),
            merged: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl AppConfig {
    /// Load and layer `paths`. With no paths, `./docflow.toml` is used when
    /// present, otherwise defaults.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            let local = PathBuf::from(DEFAULT_CONFIG_FILE);
            if local.is_file() {
                return Self::load(&[local]);
            }
            return Ok(Self::default());
        }

        let mut merged = toml::Value::Table(toml::map::Map::new());
        for path in paths {
            let layer = read_layer(path)?;
            merge(&mut merged, layer);
        }
        let mut config = Self::from_value(merged)
            .with_context(|| format!("Invalid configuration in {}", display_paths(paths)))?;
        config.sources = paths.to_vec();
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(text).context("Failed to parse TOML")?;
        Self::from_value(value)
    }

    fn from_value(merged: toml::Value) -> Result<Self> {
        let file = merged.clone().try_into::<ConfigFile>()?;
        if !(0.0..=1.0).contains(&file.pipeline.confidence_threshold) {
            anyhow::bail!(
                "pipeline.confidence_threshold must be within [0, 1], got {}",
                file.pipeline.confidence_threshold
            );
        }
        Ok(Self {
            broker: file.broker,
            pipeline: file.pipeline,
            managers: file.managers,
            sources: Vec::new(),
            merged,
        })
    }

    /// Override the broker URL (CLI flag or `DOCFLOW_BROKER_URL`).
    pub fn with_broker_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.broker.url = url.clone();
            if let toml::Value::Table(root) = &mut self.merged {
                let broker = root
                    .entry("broker")
                    .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
                if let toml::Value::Table(broker) = broker {
                    broker.insert("url".to_string(), toml::Value::String(url));
                }
            }
        }
        self
    }

    /// Raw value at a dotted key such as `pipeline.confidence_threshold`,
    /// as written in the merged files.
    pub fn get(&self, dotted: &str) -> Option<&toml::Value> {
        dotted
            .split('.')
            .try_fold(&self.merged, |value, key| match value {
                toml::Value::Table(table) => table.get(key),
                toml::Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            })
    }

    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            url: self.broker.url.clone(),
            prefetch: self.broker.prefetch.max(1),
            max_redeliveries: self.broker.max_redeliveries,
        }
    }
}

fn read_layer(path: &Path) -> Result<toml::Value> {
    if !path.is_file() {
        return Err(HelpfulError::config_not_found(path).into());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Merge `layer` into `base`. Tables merge recursively; anything else is
/// replaced.
fn merge(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
