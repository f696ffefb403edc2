//! Entry points that start or resume a journey from outside the pipeline.

use tracing::info;

use docflow_bus::{publish_with_retry, BusError, MessageBusAdapter, RetryPolicy};
use docflow_protocol::{queues, CorrelationId, Envelope};

/// Publish `OCR_REQUESTED` for a document and return its new correlation id.
pub async fn submit_document(
    bus: &MessageBusAdapter,
    path: &str,
    reply_to: Option<&str>,
    retry: RetryPolicy,
) -> Result<CorrelationId, BusError> {
    let correlation_id = CorrelationId::new();
    let mut envelope = Envelope::ocr_requested(correlation_id.clone(), path);
    if let Some(queue) = reply_to {
        envelope = envelope.with_reply_to(queue);
    }
    publish_with_retry(bus, queues::OCR_REQUESTS, &envelope, retry).await?;
    info!(correlation_id = %correlation_id, path, "Document submitted");
    Ok(correlation_id)
}

/// Publish a human correction for an existing journey.
pub async fn submit_correction(
    bus: &MessageBusAdapter,
    correlation_id: CorrelationId,
    label: &str,
    text: Option<String>,
    retry: RetryPolicy,
) -> Result<(), BusError> {
    let envelope = Envelope::feedback_submitted(correlation_id, label, text);
    publish_with_retry(bus, queues::FEEDBACK_RESULTS, &envelope, retry).await?;
    info!(correlation_id = %envelope.correlation_id(), label, "Correction submitted");
    Ok(())
}
