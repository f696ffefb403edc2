//! Manager kinds the binary knows how to build.
//!
//! Every pipeline component is a manager in the registry: the bus, the
//! coordinator, each collaborator and each stage. Stages declare the bus,
//! the coordinator and their collaborator as dependencies and subscribe to
//! their queue in `start`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use docflow_bus::{BusConfig, MessageBusAdapter, MessageHandler};
use docflow_pipeline::{
    ClassificationModel, FeedbackStageHandler, FeedbackStore, ModelActivator, ModelTrainer,
    ModelUpdateStageHandler, OcrEngine, OcrStageHandler, PipelineCoordinator,
    PredictionStageHandler, Stage, StageContext, TextLookup, TrainingStageHandler,
};
use docflow_registry::{
    Dependencies, Manager, ManagerConstructor, ManagerFactory, ManagerInstance, ManagerSpec,
    RegistryError,
};

use crate::config::{AppConfig, PipelineSection};
use crate::engines::{
    CatalogTextLookup, CommandOcr, JsonlFeedbackStore, KeywordClassifier, KeywordTrainer,
    TextFileOcr,
};
use crate::error::HelpfulError;

pub const KIND_MESSAGE_BUS: &str = "message_bus";
pub const KIND_COORDINATOR: &str = "coordinator";
pub const KIND_TEXT_LOOKUP: &str = "text_lookup";
pub const KIND_OCR_ENGINE: &str = "ocr_engine";
pub const KIND_CLASSIFIER: &str = "classifier";
pub const KIND_FEEDBACK_STORE: &str = "feedback_store";
pub const KIND_TRAINER: &str = "trainer";

/// Manager kind of each stage.
pub fn stage_kind(stage: Stage) -> &'static str {
    match stage {
        Stage::Ocr => "ocr_stage",
        Stage::Prediction => "prediction_stage",
        Stage::Feedback => "feedback_stage",
        Stage::Training => "training_stage",
        Stage::ModelUpdate => "model_update_stage",
    }
}

/// Collaborator manager a stage uses unless its args say otherwise.
fn default_collaborator(stage: Stage) -> &'static str {
    match stage {
        Stage::Ocr => KIND_OCR_ENGINE,
        Stage::Prediction | Stage::ModelUpdate => KIND_CLASSIFIER,
        Stage::Feedback => KIND_FEEDBACK_STORE,
        Stage::Training => KIND_TRAINER,
    }
}

// ============================================================================
// Managers
// ============================================================================

pub struct BusManager {
    bus: Arc<MessageBusAdapter>,
}

impl BusManager {
    pub fn bus(&self) -> &Arc<MessageBusAdapter> {
        &self.bus
    }
}

#[async_trait]
impl Manager for BusManager {
    fn kind(&self) -> &str {
        KIND_MESSAGE_BUS
    }

    async fn shutdown(&self) -> Result<()> {
        self.bus.close().await.context("Failed to close message bus")?;
        debug!(metrics = %self.bus.metrics().prometheus_format(), "Final bus metrics");
        Ok(())
    }
}

pub struct CoordinatorManager {
    coordinator: Arc<PipelineCoordinator>,
}

impl Manager for CoordinatorManager {
    fn kind(&self) -> &str {
        KIND_COORDINATOR
    }
}

pub struct TextLookupManager {
    lookup: Arc<dyn TextLookup>,
}

impl Manager for TextLookupManager {
    fn kind(&self) -> &str {
        KIND_TEXT_LOOKUP
    }
}

pub struct OcrEngineManager {
    engine: Arc<dyn OcrEngine>,
}

impl Manager for OcrEngineManager {
    fn kind(&self) -> &str {
        KIND_OCR_ENGINE
    }
}

/// The classifier doubles as the model activator.
pub struct ClassifierManager {
    classifier: Arc<KeywordClassifier>,
}

impl ClassifierManager {
    pub fn classifier(&self) -> &Arc<KeywordClassifier> {
        &self.classifier
    }
}

impl Manager for ClassifierManager {
    fn kind(&self) -> &str {
        KIND_CLASSIFIER
    }
}

pub struct FeedbackStoreManager {
    store: Arc<dyn FeedbackStore>,
}

impl Manager for FeedbackStoreManager {
    fn kind(&self) -> &str {
        KIND_FEEDBACK_STORE
    }
}

pub struct TrainerManager {
    trainer: Arc<dyn ModelTrainer>,
}

impl Manager for TrainerManager {
    fn kind(&self) -> &str {
        KIND_TRAINER
    }
}

/// A stage handler waiting to be attached to its queue.
pub struct StageManager {
    stage: Stage,
    bus: Arc<MessageBusAdapter>,
    handler: Arc<dyn MessageHandler>,
}

impl StageManager {
    pub fn stage(&self) -> Stage {
        self.stage
    }
}

#[async_trait]
impl Manager for StageManager {
    fn kind(&self) -> &str {
        stage_kind(self.stage)
    }

    async fn start(&self) -> Result<()> {
        let queue = self.stage.input_queue();
        self.bus
            .consume(queue, Arc::clone(&self.handler))
            .await
            .with_context(|| format!("{} stage could not subscribe to '{}'", self.stage, queue))?;
        info!(stage = %self.stage, queue, "Stage started");
        Ok(())
    }
}

// ============================================================================
// Constructor arguments
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CoordinatorArgs {
    confidence_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TextLookupArgs {
    path: Option<PathBuf>,
    language: String,
    fallback_language: String,
}

impl Default for TextLookupArgs {
    fn default() -> Self {
        Self {
            path: None,
            language: crate::engines::catalog::DEFAULT_LANGUAGE.to_string(),
            fallback_language: crate::engines::catalog::DEFAULT_LANGUAGE.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OcrEngineChoice {
    #[default]
    TextFile,
    Command,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OcrEngineArgs {
    engine: OcrEngineChoice,
    program: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PathArgs {
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TrainerArgs {
    output_dir: Option<PathBuf>,
    /// Classifier manager whose active model training starts from.
    base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StageArgs {
    bus: Option<String>,
    coordinator: Option<String>,
    collaborator: Option<String>,
    text_lookup: Option<String>,
    timeout_secs: Option<u64>,
}

fn data_path(explicit: Option<PathBuf>, relative: &str) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Ok(docflow_logging::docflow_home()?.join(relative)),
    }
}

// ============================================================================
// Constructors
// ============================================================================

/// Connects the bus and declares the queue topology. Async, so it cannot be
/// a closure constructor.
struct BusConstructor {
    config: BusConfig,
}

#[async_trait]
impl ManagerConstructor for BusConstructor {
    fn kind(&self) -> &str {
        KIND_MESSAGE_BUS
    }

    async fn construct(&self, spec: &ManagerSpec, _deps: &Dependencies<'_>) -> Result<ManagerInstance> {
        let bus = MessageBusAdapter::connect(self.config.clone())
            .await
            .map_err(|e| anyhow!(e).context(HelpfulError::broker_unreachable(&self.config.url)))?;
        bus.declare_topology()
            .await
            .with_context(|| format!("'{}' could not declare the queue topology", spec.name))?;
        Ok(ManagerInstance::new(Arc::new(BusManager { bus: Arc::new(bus) })))
    }
}

struct ClassifierConstructor;

#[async_trait]
impl ManagerConstructor for ClassifierConstructor {
    fn kind(&self) -> &str {
        KIND_CLASSIFIER
    }

    async fn construct(&self, spec: &ManagerSpec, _deps: &Dependencies<'_>) -> Result<ManagerInstance> {
        let args: PathArgs = spec.args.parse()?;
        let path = data_path(args.path, "models/current.json")?;
        let classifier = KeywordClassifier::open(&path)
            .await
            .with_context(|| format!("'{}' could not load model {}", spec.name, path.display()))?;
        Ok(ManagerInstance::new(Arc::new(ClassifierManager {
            classifier: Arc::new(classifier),
        })))
    }
}

/// Builds one stage handler from its declared dependencies.
struct StageConstructor {
    stage: Stage,
    pipeline: PipelineSection,
}

impl StageConstructor {
    fn context(&self, args: &StageArgs, deps: &Dependencies<'_>) -> Result<(Arc<MessageBusAdapter>, StageContext)> {
        let bus = deps
            .get::<BusManager>(args.bus.as_deref().unwrap_or(KIND_MESSAGE_BUS))?
            .bus()
            .clone();
        let coordinator = deps
            .get::<CoordinatorManager>(args.coordinator.as_deref().unwrap_or(KIND_COORDINATOR))?
            .coordinator
            .clone();
        let timeout = Duration::from_secs(args.timeout_secs.unwrap_or(self.pipeline.stage_timeout_secs));
        let mut ctx = StageContext::new(Arc::clone(&bus), coordinator)
            .with_timeout(timeout)
            .with_retry(self.pipeline.retry_policy());

        let lookup_name = match &args.text_lookup {
            Some(name) => Some(name.as_str()),
            None => deps
                .names()
                .iter()
                .any(|n| n == KIND_TEXT_LOOKUP)
                .then_some(KIND_TEXT_LOOKUP),
        };
        if let Some(name) = lookup_name {
            ctx = ctx.with_lookup(deps.get::<TextLookupManager>(name)?.lookup.clone());
        }
        Ok((bus, ctx))
    }
}

#[async_trait]
impl ManagerConstructor for StageConstructor {
    fn kind(&self) -> &str {
        stage_kind(self.stage)
    }

    async fn construct(&self, spec: &ManagerSpec, deps: &Dependencies<'_>) -> Result<ManagerInstance> {
        let args: StageArgs = spec.args.parse()?;
        let (bus, ctx) = self.context(&args, deps)?;
        let collaborator = args
            .collaborator
            .as_deref()
            .unwrap_or(default_collaborator(self.stage));

        let handler: Arc<dyn MessageHandler> = match self.stage {
            Stage::Ocr => {
                let engine = deps.get::<OcrEngineManager>(collaborator)?.engine.clone();
                Arc::new(OcrStageHandler::new(ctx, engine))
            }
            Stage::Prediction => {
                let model: Arc<dyn ClassificationModel> =
                    deps.get::<ClassifierManager>(collaborator)?.classifier.clone();
                Arc::new(PredictionStageHandler::new(ctx, model))
            }
            Stage::Feedback => {
                let store = deps.get::<FeedbackStoreManager>(collaborator)?.store.clone();
                Arc::new(FeedbackStageHandler::new(ctx, store))
            }
            Stage::Training => {
                let trainer = deps.get::<TrainerManager>(collaborator)?.trainer.clone();
                Arc::new(TrainingStageHandler::new(ctx, trainer))
            }
            Stage::ModelUpdate => {
                let activator: Arc<dyn ModelActivator> =
                    deps.get::<ClassifierManager>(collaborator)?.classifier.clone();
                Arc::new(ModelUpdateStageHandler::new(ctx, activator))
            }
        };

        Ok(ManagerInstance::new(Arc::new(StageManager {
            stage: self.stage,
            bus,
            handler,
        })))
    }
}

/// Factory with every built-in kind.
pub fn builtin_factory(config: &AppConfig) -> std::result::Result<ManagerFactory, RegistryError> {
    let mut factory = ManagerFactory::new();

    factory.register(Box::new(BusConstructor {
        config: config.bus_config(),
    }))?;

    let default_threshold = config.pipeline.confidence_threshold;
    factory.register_fn(KIND_COORDINATOR, move |spec, _deps| {
        let args: CoordinatorArgs = spec.args.parse()?;
        let coordinator =
            PipelineCoordinator::new(args.confidence_threshold.unwrap_or(default_threshold))?;
        Ok(ManagerInstance::new(Arc::new(CoordinatorManager {
            coordinator: Arc::new(coordinator),
        })))
    })?;

    factory.register_fn(KIND_TEXT_LOOKUP, |spec, _deps| {
        let args: TextLookupArgs = spec.args.parse()?;
        let lookup = match &args.path {
            Some(path) => CatalogTextLookup::from_file(path, &args.language, &args.fallback_language)?,
            None => CatalogTextLookup::builtin(),
        };
        Ok(ManagerInstance::new(Arc::new(TextLookupManager {
            lookup: Arc::new(lookup),
        })))
    })?;

    factory.register_fn(KIND_OCR_ENGINE, |spec, _deps| {
        let args: OcrEngineArgs = spec.args.parse()?;
        let engine: Arc<dyn OcrEngine> = match args.engine {
            OcrEngineChoice::TextFile => Arc::new(TextFileOcr),
            OcrEngineChoice::Command => match args.program {
                Some(program) => Arc::new(CommandOcr::new(
                    program,
                    args.args.unwrap_or_else(|| vec!["{path}".to_string()]),
                )),
                None => Arc::new(CommandOcr::default()),
            },
        };
        Ok(ManagerInstance::new(Arc::new(OcrEngineManager { engine })))
    })?;

    factory.register(Box::new(ClassifierConstructor))?;

    factory.register_fn(KIND_FEEDBACK_STORE, |spec, _deps| {
        let args: PathArgs = spec.args.parse()?;
        let path = data_path(args.path, "feedback/corrections.jsonl")?;
        Ok(ManagerInstance::new(Arc::new(FeedbackStoreManager {
            store: Arc::new(JsonlFeedbackStore::new(path)),
        })))
    })?;

    factory.register_fn(KIND_TRAINER, |spec, deps| {
        let args: TrainerArgs = spec.args.parse()?;
        let mut trainer = KeywordTrainer::new(data_path(args.output_dir, "models")?);
        let base = match &args.base {
            Some(name) => Some(name.as_str()),
            None => deps
                .names()
                .iter()
                .any(|n| n == KIND_CLASSIFIER)
                .then_some(KIND_CLASSIFIER),
        };
        if let Some(name) = base {
            trainer = trainer.with_base(deps.get::<ClassifierManager>(name)?.classifier.clone());
        }
        Ok(ManagerInstance::new(Arc::new(TrainerManager {
            trainer: Arc::new(trainer),
        })))
    })?;

    for stage in Stage::ALL {
        factory.register(Box::new(StageConstructor {
            stage: *stage,
            pipeline: config.pipeline.clone(),
        }))?;
    }

    Ok(factory)
}

/// The full pipeline, used when the config lists no managers.
pub fn default_managers() -> Vec<ManagerSpec> {
    let stage = |stage: Stage, collaborator: &str, lookup: bool| {
        let spec = ManagerSpec::new(stage_kind(stage), stage_kind(stage))
            .depends_on(KIND_MESSAGE_BUS)
            .depends_on(KIND_COORDINATOR)
            .depends_on(collaborator);
        if lookup {
            spec.depends_on(KIND_TEXT_LOOKUP)
        } else {
            spec
        }
    };
    vec![
        ManagerSpec::new(KIND_MESSAGE_BUS, KIND_MESSAGE_BUS),
        ManagerSpec::new(KIND_COORDINATOR, KIND_COORDINATOR),
        ManagerSpec::new(KIND_TEXT_LOOKUP, KIND_TEXT_LOOKUP),
        ManagerSpec::new(KIND_OCR_ENGINE, KIND_OCR_ENGINE),
        ManagerSpec::new(KIND_CLASSIFIER, KIND_CLASSIFIER),
        ManagerSpec::new(KIND_FEEDBACK_STORE, KIND_FEEDBACK_STORE),
        ManagerSpec::new(KIND_TRAINER, KIND_TRAINER).depends_on(KIND_CLASSIFIER),
        stage(Stage::Ocr, KIND_OCR_ENGINE, true),
        stage(Stage::Prediction, KIND_CLASSIFIER, true),
        stage(Stage::Feedback, KIND_FEEDBACK_STORE, false),
        stage(Stage::Training, KIND_TRAINER, false),
        stage(Stage::ModelUpdate, KIND_CLASSIFIER, false),
    ]
}
