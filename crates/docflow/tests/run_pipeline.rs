//! Runs the binary's pipeline end to end on the in-process broker.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docflow::engines::KeywordModel;
use docflow::{check, run, AppConfig};

fn pipeline_config(dir: &Path, broker_url: &str) -> Result<AppConfig> {
    let text = format!(
        r#"
        [broker]
        url = "{broker_url}"
        max_redeliveries = 1

        [pipeline]
        confidence_threshold = 0.8
        stage_timeout_secs = 5
        publish_retry_base_ms = 1

        [[managers]]
        name = "message_bus"
        kind = "message_bus"

        [[managers]]
        name = "coordinator"
        kind = "coordinator"

        [[managers]]
        name = "ocr_engine"
        kind = "ocr_engine"

        [[managers]]
        name = "classifier"
        kind = "classifier"
        args = {{ path = '{models}/current.json' }}

        [[managers]]
        name = "ocr_stage"
        kind = "ocr_stage"
        dependencies = ["message_bus", "coordinator", "ocr_engine"]

        [[managers]]
        name = "prediction_stage"
        kind = "prediction_stage"
        dependencies = ["message_bus", "coordinator", "classifier"]
        "#,
        models = dir.join("models").display(),
    );
    AppConfig::from_toml_str(&text)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[test]
fn test_sample_config_is_valid() -> Result<()> {
    let sample = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../../docflow.toml"));
    let config = AppConfig::load(&[sample])?;
    let order = check(&config)?;
    assert_eq!(order.len(), 12);
    assert_eq!(order[0], "message_bus");
    let pos = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(pos("classifier") < pos("trainer"));
    assert!(pos("trainer") < pos("training_stage"));
    Ok(())
}

#[tokio::test]
async fn test_confident_document_completes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut model = KeywordModel::default();
    model.learn("invoice", "invoice amount due");
    model.save(&dir.path().join("models/current.json")).await?;

    let doc = dir.path().join("scan.txt");
    std::fs::write(&doc, "INVOICE\nAmount due: 120 EUR")?;

    let config = pipeline_config(dir.path(), "memory://")?;
    let summary = run(&config, &[doc.clone()], None, settle()).await?;

    assert_eq!(summary.submitted.len(), 1);
    assert_eq!(summary.submitted[0].0, doc);
    // OCR_REQUESTED, OCR_COMPLETED, PREDICTION_COMPLETED
    assert_eq!(summary.metrics.published, 3);
    assert_eq!(summary.metrics.acked, 2);
    assert_eq!(summary.metrics.dead_lettered, 0);
    Ok(())
}

#[tokio::test]
async fn test_unreadable_document_goes_to_feedback() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = pipeline_config(dir.path(), "memory://")?;
    let missing = dir.path().join("missing.png");

    let summary = run(&config, &[missing], None, settle()).await?;

    // OCR_REQUESTED, FEEDBACK_REQUESTED
    assert_eq!(summary.metrics.published, 2);
    assert_eq!(summary.metrics.acked, 1);
    assert_eq!(summary.metrics.requeued, 0);
    Ok(())
}

#[tokio::test]
async fn test_unsupported_broker_fails_startup() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = pipeline_config(dir.path(), "kafka://localhost:9092")?;

    let err = run(&config, &[], None, settle()).await.unwrap_err();
    let text = format!("{err:#}");
    assert!(text.contains("message_bus"), "{text}");
    assert!(text.contains("kafka://localhost:9092"), "{text}");
    Ok(())
}
