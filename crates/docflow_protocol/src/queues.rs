//! Fixed queue topology.
//!
//! Every queue is declared durable at startup. Rejected (poison) messages
//! land on [`DEAD_LETTER`].

pub const OCR_REQUESTS: &str = "ocr.requests";
pub const OCR_RESULTS: &str = "ocr.results";
pub const PREDICTION_REQUESTS: &str = "prediction.requests";
pub const PREDICTION_RESULTS: &str = "prediction.results";
pub const FEEDBACK_REQUESTS: &str = "feedback.requests";
pub const FEEDBACK_RESULTS: &str = "feedback.results";
pub const TRAINING_REQUESTS: &str = "training.requests";
pub const TRAINING_RESULTS: &str = "training.results";

pub const DEAD_LETTER: &str = "dead_letter";

/// The eight pipeline queues, in stage order.
pub const PIPELINE_QUEUES: &[&str] = &[
    OCR_REQUESTS,
    OCR_RESULTS,
    PREDICTION_REQUESTS,
    PREDICTION_RESULTS,
    FEEDBACK_REQUESTS,
    FEEDBACK_RESULTS,
    TRAINING_REQUESTS,
    TRAINING_RESULTS,
];

/// Pipeline queues plus the dead-letter queue.
pub fn all_queues() -> Vec<&'static str> {
    let mut queues = PIPELINE_QUEUES.to_vec();
    queues.push(DEAD_LETTER);
    queues
}
