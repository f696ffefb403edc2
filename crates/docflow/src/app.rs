//! Command implementations.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use docflow_bus::{BusMetricsSnapshot, MessageBusAdapter};
use docflow_pipeline::{submit_document, PipelineCoordinator, Stage};
use docflow_protocol::{queues, CorrelationId, MessageKind};
use docflow_registry::ManagerRegistry;

use crate::config::AppConfig;
use crate::error::HelpfulError;
use crate::managers::{builtin_factory, default_managers, BusManager, KIND_MESSAGE_BUS};

/// What a `run` did before it was stopped.
#[derive(Debug)]
pub struct RunSummary {
    pub submitted: Vec<(PathBuf, CorrelationId)>,
    pub metrics: BusMetricsSnapshot,
}

/// Registry loaded with the configured managers, or the built-in pipeline.
pub fn build_registry(config: &AppConfig) -> Result<ManagerRegistry> {
    let factory = builtin_factory(config).context("Failed to register manager kinds")?;
    let mut registry = ManagerRegistry::new(factory);
    let specs = if config.managers.is_empty() {
        default_managers()
    } else {
        config.managers.clone()
    };
    registry.register_all(specs).context("Invalid manager list")?;
    Ok(registry)
}

/// Validate the manager graph and return its construction order.
pub fn check(config: &AppConfig) -> Result<Vec<String>> {
    let registry = build_registry(config)?;
    Ok(registry.plan()?)
}

/// Build and start everything, submit `files`, then wait for `stop`.
///
/// The registry is shut down on every path out of here, including startup
/// failures.
pub async fn run<F>(
    config: &AppConfig,
    files: &[PathBuf],
    reply_to: Option<&str>,
    stop: F,
) -> Result<RunSummary>
where
    F: Future<Output = ()>,
{
    let mut registry = build_registry(config)?;
    let outcome = drive(&mut registry, config, files, reply_to, stop).await;
    registry.shutdown().await;
    outcome
}

async fn drive<F>(
    registry: &mut ManagerRegistry,
    config: &AppConfig,
    files: &[PathBuf],
    reply_to: Option<&str>,
    stop: F,
) -> Result<RunSummary>
where
    F: Future<Output = ()>,
{
    registry.initialize().await?;
    registry.start_all().await?;
    let bus = bus_of(registry)?;

    let mut submitted = Vec::with_capacity(files.len());
    for file in files {
        let path = document_path(file);
        let id = submit_document(&bus, &path, reply_to, config.pipeline.retry_policy())
            .await
            .with_context(|| format!("Failed to submit {}", file.display()))?;
        submitted.push((file.clone(), id));
    }

    info!(
        documents = submitted.len(),
        consumers = bus.consumed_queues().len(),
        "Pipeline running, press Ctrl-C to stop"
    );
    stop.await;
    info!("Shutdown requested");

    Ok(RunSummary {
        submitted,
        metrics: bus.metrics().snapshot(),
    })
}

fn bus_of(registry: &ManagerRegistry) -> Result<Arc<MessageBusAdapter>> {
    registry
        .specs()
        .iter()
        .filter(|spec| spec.kind == KIND_MESSAGE_BUS)
        .find_map(|spec| registry.get_as::<BusManager>(&spec.name))
        .map(|manager| Arc::clone(manager.bus()))
        .ok_or_else(|| HelpfulError::no_bus_manager().into())
}

/// Absolute path when the file exists; stages may run elsewhere.
fn document_path(file: &Path) -> String {
    match std::fs::canonicalize(file) {
        Ok(path) => path.display().to_string(),
        Err(e) => {
            warn!(path = %file.display(), error = %e, "Submitting a path that cannot be resolved");
            file.display().to_string()
        }
    }
}

/// One row of `docflow queues`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub queue: &'static str,
    pub consumer: Option<Stage>,
    pub kinds: Vec<MessageKind>,
}

/// The fixed topology: each queue, its consuming stage and the kinds routed
/// to it by default.
pub fn topology() -> Vec<QueueRow> {
    queues::all_queues()
        .into_iter()
        .map(|queue| QueueRow {
            queue,
            consumer: Stage::ALL.iter().copied().find(|s| s.input_queue() == queue),
            kinds: MessageKind::ALL
                .iter()
                .copied()
                .filter(|kind| PipelineCoordinator::default_queue(*kind) == queue)
                .collect(),
        })
        .collect()
}
