//! End-to-end stage behavior over the memory broker with fake collaborators.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docflow_bus::*;
use docflow_pipeline::*;
use docflow_protocol::queues::*;
use docflow_protocol::{CorrelationId, Envelope, MessageKind, Sample};

// ============================================================================
// Fakes
// ============================================================================

/// Memory broker that keeps a copy of every published body.
#[derive(Clone, Default)]
struct RecordingBroker {
    inner: MemoryBroker,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl RecordingBroker {
    fn published(&self) -> Vec<(String, Envelope)> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(q, body)| Envelope::decode(body).ok().map(|e| (q.clone(), e)))
            .collect()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        self.inner.declare_queue(queue, durable).await
    }

    async fn publish(&self, queue: &str, body: Vec<u8>, persistent: bool) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), body.clone()));
        self.inner.publish(queue, body, persistent).await
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        self.inner.subscribe(queue, prefetch).await
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

enum OcrBehavior {
    Text(&'static str),
    Fail,
    Hang,
}

struct FakeOcr(OcrBehavior);

#[async_trait]
impl OcrEngine for FakeOcr {
    async fn extract_text(&self, _path: &Path) -> Result<String, CollaboratorError> {
        match self.0 {
            OcrBehavior::Text(text) => Ok(text.to_string()),
            OcrBehavior::Fail => Err(CollaboratorError::failed("scanner on fire")),
            OcrBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(String::new())
            }
        }
    }
}

enum ModelBehavior {
    Score(f64),
    Fail,
    Hang,
}

struct FakeModel(ModelBehavior);

#[async_trait]
impl ClassificationModel for FakeModel {
    async fn predict(&self, _text: &str) -> Result<Prediction, CollaboratorError> {
        let confidence = match self.0 {
            ModelBehavior::Score(confidence) => confidence,
            ModelBehavior::Fail => return Err(CollaboratorError::failed("weights missing")),
            ModelBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                0.99
            }
        };
        Ok(Prediction {
            label: "invoice".to_string(),
            confidence,
        })
    }
}

#[derive(Default)]
struct FakeStore {
    saved: Mutex<Vec<(CorrelationId, String)>>,
}

#[async_trait]
impl FeedbackStore for FakeStore {
    async fn save_correction(
        &self,
        correlation_id: &CorrelationId,
        label: &str,
    ) -> Result<(), CollaboratorError> {
        self.saved
            .lock()
            .unwrap()
            .push((correlation_id.clone(), label.to_string()));
        Ok(())
    }
}

/// Store that is always down, counting how often it was tried.
#[derive(Default)]
struct DownStore {
    attempts: Mutex<u32>,
}

#[async_trait]
impl FeedbackStore for DownStore {
    async fn save_correction(
        &self,
        _correlation_id: &CorrelationId,
        _label: &str,
    ) -> Result<(), CollaboratorError> {
        *self.attempts.lock().unwrap() += 1;
        Err(CollaboratorError::failed("disk full"))
    }
}

struct FakeTrainer {
    fail: bool,
}

#[async_trait]
impl ModelTrainer for FakeTrainer {
    async fn train(&self, samples: &[Sample]) -> Result<PathBuf, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::failed("out of memory"));
        }
        Ok(PathBuf::from(format!("/models/model-{}.json", samples.len())))
    }
}

#[derive(Default)]
struct FakeActivator {
    activated: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl ModelActivator for FakeActivator {
    async fn activate(&self, model_path: &Path) -> Result<(), CollaboratorError> {
        self.activated.lock().unwrap().push(model_path.to_path_buf());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    bus: Arc<MessageBusAdapter>,
    broker: RecordingBroker,
    ctx: StageContext,
}

async fn harness() -> Result<Harness> {
    let broker = RecordingBroker::default();
    let config = BusConfig {
        max_redeliveries: 2,
        ..BusConfig::default()
    };
    let bus = Arc::new(MessageBusAdapter::with_broker(config, Arc::new(broker.clone())));
    bus.declare_topology().await?;
    let ctx = StageContext::new(Arc::clone(&bus), Arc::new(PipelineCoordinator::new(0.8)?))
        .with_timeout(Duration::from_millis(200))
        .with_retry(RetryPolicy::none());
    Ok(Harness { bus, broker, ctx })
}

async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn queued(broker: &RecordingBroker, queue: &str) -> Vec<Envelope> {
    broker
        .inner
        .messages(queue)
        .iter()
        .map(|body| Envelope::decode(body).unwrap())
        .collect()
}

fn ocr_request(id: &str) -> Envelope {
    Envelope::ocr_requested(CorrelationId::parse(id).unwrap(), "/x.png")
}

// ============================================================================
// OCR stage
// ============================================================================

#[tokio::test]
async fn test_ocr_success_publishes_completion_to_prediction_queue() -> Result<()> {
    let h = harness().await?;
    let handler = OcrStageHandler::new(h.ctx.clone(), Arc::new(FakeOcr(OcrBehavior::Text("INVOICE"))));
    attach(&h.bus, Arc::new(handler)).await?;

    h.bus.publish(OCR_REQUESTS, &ocr_request("doc-1")).await?;

    assert!(eventually(|| h.broker.inner.depth(PREDICTION_REQUESTS) == 1).await);
    let out = queued(&h.broker, PREDICTION_REQUESTS);
    assert_eq!(out[0].kind(), MessageKind::OcrCompleted);
    assert_eq!(out[0].correlation_id().as_str(), "doc-1");
    assert_eq!(out[0].payload().get_str("text"), Some("INVOICE"));

    h.bus.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_ocr_failure_requests_feedback_and_acks_once() -> Result<()> {
    let h = harness().await?;
    let handler = OcrStageHandler::new(h.ctx.clone(), Arc::new(FakeOcr(OcrBehavior::Fail)));
    attach(&h.bus, Arc::new(handler)).await?;

    h.bus.publish(OCR_REQUESTS, &ocr_request("doc-1")).await?;

    assert!(eventually(|| h.broker.inner.depth(FEEDBACK_REQUESTS) == 1).await);
    let out = queued(&h.broker, FEEDBACK_REQUESTS);
    assert_eq!(out[0].kind(), MessageKind::FeedbackRequested);
    assert_eq!(out[0].correlation_id().as_str(), "doc-1");
    assert!(out[0].payload().get_str("reason").unwrap().contains("scanner on fire"));
    assert_eq!(out[0].payload().get_str("stage"), Some("ocr"));

    assert!(eventually(|| h.broker.inner.stats(OCR_REQUESTS).map(|s| s.acked) == Some(1)).await);
    let stats = h.broker.inner.stats(OCR_REQUESTS).unwrap();
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.delivered, 1);
    assert_eq!(h.broker.inner.depth(PREDICTION_REQUESTS), 0);

    h.bus.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_ocr_timeout_takes_failure_branch() -> Result<()> {
    let h = harness().await?;
    let handler = OcrStageHandler::new(h.ctx.clone(), Arc::new(FakeOcr(OcrBehavior::Hang)));
    attach(&h.bus, Arc::new(handler)).await?;

    h.bus.publish(OCR_REQUESTS, &ocr_request("doc-slow")).await?;

    assert!(eventually(|| h.broker.inner.depth(FEEDBACK_REQUESTS) == 1).await);
    assert_eq!(h.bus.metrics().snapshot().handler_timeouts, 1);
    assert!(eventually(|| h.broker.inner.stats(OCR_REQUESTS).map(|s| s.acked) == Some(1)).await);
    assert_eq!(h.broker.inner.stats(OCR_REQUESTS).unwrap().requeued, 0);

    h.bus.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_ocr_honors_reply_to_on_success() -> Result<()> {
    let h = harness().await?;
    h.bus.declare_queues(&["custom.results"]).await?;
    let handler = OcrStageHandler::new(h.ctx.clone(), Arc::new(FakeOcr(OcrBehavior::Text("hi"))));
    attach(&h.bus, Arc::new(handler)).await?;

    let request = ocr_request("doc-2").with_reply_to("custom.results");
    h.bus.publish(OCR_REQUESTS, &request).await?;

    assert!(eventually(|| h.broker.inner.depth("custom.results") == 1).await);
    assert_eq!(h.broker.inner.depth(PREDICTION_REQUESTS), 0);

    h.bus.close().await?;
    Ok(())
}

// ============================================================================
// Poison isolation
// ============================================================================

#[tokio::test]
async fn test_unknown_kind_is_dead_lettered_without_advancing() -> Result<()> {
    let h = harness().await?;
    let handler = OcrStageHandler::new(h.ctx.clone(), Arc::new(FakeOcr(OcrBehavior::Text("x"))));
    attach(&h.bus, Arc::new(handler)).await?;

    let body = br#"{"kind":"UNKNOWN_KIND","correlation_id":"doc-9","payload":{}}"#.to_vec();
    h.broker.publish(OCR_REQUESTS, body, true).await?;

    assert!(eventually(|| h.broker.inner.depth(DEAD_LETTER) == 1).await);
    let stats = h.broker.inner.stats(OCR_REQUESTS).unwrap();
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.dead_lettered, 1);
    assert!(h
        .broker
        .published()
        .iter()
        .all(|(_, env)| env.correlation_id().as_str() != "doc-9"));

    h.bus.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_wrong_kind_on_stage_queue_is_poison() -> Result<()> {
    let h = harness().await?;
    let handler = OcrStageHandler::new(h.ctx.clone(), Arc::new(FakeOcr(OcrBehavior::Text("x"))));
    attach(&h.bus, Arc::new(handler)).await?;

    let stray = Envelope::feedback_submitted(CorrelationId::parse("doc-3")?, "invoice", None);
    h.bus.publish(OCR_REQUESTS, &stray).await?;

    assert!(eventually(|| h.broker.inner.depth(DEAD_LETTER) == 1).await);
    assert_eq!(h.broker.inner.stats(OCR_REQUESTS).unwrap().requeued, 0);

    h.bus.close().await?;
    Ok(())
}

// ============================================================================
// Prediction stage
// ============================================================================

#[tokio::test]
async fn test_confident_prediction_completes() -> Result<()> {
    let h = harness().await?;
    let handler = PredictionStageHandler::new(h.ctx.clone(), Arc::new(FakeModel(ModelBehavior::Score(0.93))));
    attach(&h.bus, Arc::new(handler)).await?;

    let ocr = ocr_request("doc-4");
    let completed = ocr.follow_up(
        MessageKind::OcrCompleted,
        docflow_protocol::Payload::new().with("text", "INVOICE 42"),
    )?;
    h.bus.publish(PREDICTION_REQUESTS, &completed).await?;

    assert!(eventually(|| h.broker.inner.depth(PREDICTION_RESULTS) == 1).await);
    let out = queued(&h.broker, PREDICTION_RESULTS);
    assert_eq!(out[0].kind(), MessageKind::PredictionCompleted);
    assert_eq!(out[0].payload().get_str("label"), Some("invoice"));
    assert_eq!(out[0].payload().get_f64("confidence"), Some(0.93));
    assert_eq!(h.broker.inner.depth(FEEDBACK_REQUESTS), 0);

    h.bus.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_low_confidence_requests_feedback() -> Result<()> {
    let h = harness().await?;
    let handler = PredictionStageHandler::new(h.ctx.clone(), Arc::new(FakeModel(ModelBehavior::Score(0.42))));
    attach(&h.bus, Arc::new(handler)).await?;

    let request = Envelope::new(
        MessageKind::PredictionRequested,
        CorrelationId::parse("doc-5")?,
        docflow_protocol::Payload::new().with("text", "blurry"),
    )?
    .with_reply_to("ignored.on.feedback");
    h.bus.publish(PREDICTION_REQUESTS, &request).await?;

    assert!(eventually(|| h.broker.inner.depth(FEEDBACK_REQUESTS) == 1).await);
    let out = queued(&h.broker, FEEDBACK_REQUESTS);
    assert_eq!(out[0].kind(), MessageKind::FeedbackRequested);
    assert_eq!(out[0].payload().get_str("predicted_label"), Some("invoice"));
    assert_eq!(out[0].payload().get_str("text"), Some("blurry"));
    assert_eq!(h.broker.inner.depth(PREDICTION_RESULTS), 0);

    h.bus.close().await?;
    Ok(())
}

fn prediction_request(id: &str) -> Envelope {
    Envelope::new(
        MessageKind::PredictionRequested,
        CorrelationId::parse(id).unwrap(),
        docflow_protocol::Payload::new().with("text", "INVOICE 42"),
    )
    .unwrap()
}

/// Model errors take the failure branch: one feedback request, acked once.
async fn assert_prediction_failure_requests_feedback(
    behavior: ModelBehavior,
    id: &str,
) -> Result<Harness> {
    let h = harness().await?;
    let handler = PredictionStageHandler::new(h.ctx.clone(), Arc::new(FakeModel(behavior)));
    attach(&h.bus, Arc::new(handler)).await?;

    h.bus.publish(PREDICTION_REQUESTS, &prediction_request(id)).await?;

    assert!(eventually(|| h.broker.inner.depth(FEEDBACK_REQUESTS) == 1).await);
    let out = queued(&h.broker, FEEDBACK_REQUESTS);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].kind(), MessageKind::FeedbackRequested);
    assert_eq!(out[0].correlation_id().as_str(), id);
    assert_eq!(out[0].payload().get_str("stage"), Some("prediction"));
    assert_eq!(out[0].payload().get_str("text"), Some("INVOICE 42"));

    assert!(eventually(|| h.broker.inner.stats(PREDICTION_REQUESTS).map(|s| s.acked) == Some(1)).await);
    let stats = h.broker.inner.stats(PREDICTION_REQUESTS).unwrap();
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.delivered, 1);
    assert_eq!(h.broker.inner.depth(PREDICTION_RESULTS), 0);
    assert_eq!(h.broker.inner.depth(DEAD_LETTER), 0);
    Ok(h)
}

#[tokio::test]
async fn test_model_error_requests_feedback() -> Result<()> {
    let h = assert_prediction_failure_requests_feedback(ModelBehavior::Fail, "doc-10").await?;
    let out = queued(&h.broker, FEEDBACK_REQUESTS);
    assert!(out[0].payload().get_str("reason").unwrap().contains("weights missing"));

    h.bus.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_model_timeout_requests_feedback() -> Result<()> {
    let h = assert_prediction_failure_requests_feedback(ModelBehavior::Hang, "doc-11").await?;
    assert_eq!(h.bus.metrics().snapshot().handler_timeouts, 1);

    h.bus.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_out_of_range_confidence_is_a_model_error() -> Result<()> {
    for (i, score) in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN, 1.5, -0.1]
        .into_iter()
        .enumerate()
    {
        let id = format!("doc-score-{i}");
        let h = assert_prediction_failure_requests_feedback(ModelBehavior::Score(score), &id).await?;
        let out = queued(&h.broker, FEEDBACK_REQUESTS);
        let reason = out[0].payload().get_str("reason").unwrap();
        assert!(reason.contains("outside [0, 1]"), "{score}: {reason}");
        assert!(out[0].payload().get("predicted_label").is_none());

        h.bus.close().await?;
    }
    Ok(())
}

// ============================================================================
// Feedback stage
// ============================================================================

#[tokio::test]
async fn test_feedback_store_outage_requeues_then_dead_letters() -> Result<()> {
    let h = harness().await?;
    let store = Arc::new(DownStore::default());
    let handler = FeedbackStageHandler::new(h.ctx.clone(), store.clone());
    attach(&h.bus, Arc::new(handler)).await?;

    let correction = Envelope::feedback_submitted(CorrelationId::parse("doc-12")?, "receipt", None);
    h.bus.publish(FEEDBACK_RESULTS, &correction).await?;

    // max_redeliveries is 2: two requeues, then the third failure dead-letters
    assert!(eventually(|| h.broker.inner.depth(DEAD_LETTER) == 1).await);
    let stats = h.broker.inner.stats(FEEDBACK_RESULTS).unwrap();
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.requeued, 2);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.acked, 0);
    assert_eq!(*store.attempts.lock().unwrap(), 3);

    let dead = queued(&h.broker, DEAD_LETTER);
    assert_eq!(dead[0].correlation_id().as_str(), "doc-12");
    assert_eq!(h.broker.inner.depth(TRAINING_REQUESTS), 0);
    assert_eq!(h.bus.metrics().snapshot().requeued, 2);

    h.bus.close().await?;
    Ok(())
}

// ============================================================================
// Training stage
// ============================================================================

#[tokio::test]
async fn test_training_failure_is_terminal() -> Result<()> {
    let h = harness().await?;
    let handler = TrainingStageHandler::new(h.ctx.clone(), Arc::new(FakeTrainer { fail: true }));
    attach(&h.bus, Arc::new(handler)).await?;

    let sample = serde_json::json!({"correlation_id": "doc-6", "text": "t", "label": "invoice"});
    let request = Envelope::new(
        MessageKind::TrainingRequested,
        CorrelationId::parse("doc-6")?,
        docflow_protocol::Payload::new().with("samples", serde_json::Value::Array(vec![sample])),
    )?;
    h.bus.publish(TRAINING_REQUESTS, &request).await?;

    assert!(eventually(|| h.broker.inner.stats(TRAINING_REQUESTS).map(|s| s.acked) == Some(1)).await);
    assert_eq!(h.broker.inner.depth(TRAINING_RESULTS), 0);
    assert_eq!(h.broker.inner.depth(DEAD_LETTER), 0);
    assert_eq!(h.broker.inner.stats(TRAINING_REQUESTS).unwrap().requeued, 0);

    h.bus.close().await?;
    Ok(())
}

// ============================================================================
// Full journey
// ============================================================================

#[tokio::test]
async fn test_full_journey_keeps_correlation_and_never_regresses() -> Result<()> {
    let h = harness().await?;
    let store = Arc::new(FakeStore::default());
    let activator = Arc::new(FakeActivator::default());

    attach(
        &h.bus,
        Arc::new(OcrStageHandler::new(h.ctx.clone(), Arc::new(FakeOcr(OcrBehavior::Text("INVOICE"))))),
    )
    .await?;
    attach(
        &h.bus,
        Arc::new(PredictionStageHandler::new(h.ctx.clone(), Arc::new(FakeModel(ModelBehavior::Score(0.3))))),
    )
    .await?;
    attach(
        &h.bus,
        Arc::new(FeedbackStageHandler::new(h.ctx.clone(), store.clone())),
    )
    .await?;
    attach(
        &h.bus,
        Arc::new(TrainingStageHandler::new(h.ctx.clone(), Arc::new(FakeTrainer { fail: false }))),
    )
    .await?;
    attach(
        &h.bus,
        Arc::new(ModelUpdateStageHandler::new(h.ctx.clone(), activator.clone())),
    )
    .await?;

    let id = submit_document(&h.bus, "/scans/a.png", None, RetryPolicy::none()).await?;
    assert!(eventually(|| h.broker.inner.depth(FEEDBACK_REQUESTS) == 1).await);

    // a human looks at the feedback request and answers
    submit_correction(&h.bus, id.clone(), "receipt", Some("INVOICE".into()), RetryPolicy::none()).await?;
    assert!(eventually(|| activator.activated.lock().unwrap().len() == 1).await);

    assert_eq!(
        store.saved.lock().unwrap().as_slice(),
        &[(id.clone(), "receipt".to_string())]
    );
    assert_eq!(
        activator.activated.lock().unwrap()[0],
        PathBuf::from("/models/model-1.json")
    );

    let published = h.broker.published();
    let kinds: Vec<MessageKind> = published.iter().map(|(_, e)| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::OcrRequested,
            MessageKind::OcrCompleted,
            MessageKind::FeedbackRequested,
            MessageKind::FeedbackSubmitted,
            MessageKind::TrainingRequested,
            MessageKind::TrainingCompleted,
        ]
    );
    assert!(published.iter().all(|(_, e)| e.correlation_id() == &id));

    let mut log = JourneyLog::new();
    for (_, envelope) in &published {
        log.observe(envelope)?;
    }
    assert_eq!(log.get(&id).unwrap().current(), PipelineState::TrainingDone);

    let samples = published[4].1.samples()?;
    assert_eq!(samples[0].label, "receipt");
    assert_eq!(samples[0].text, "INVOICE");

    h.bus.close().await?;
    Ok(())
}
