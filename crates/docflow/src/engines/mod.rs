//! Built-in collaborators so the binary runs end to end without external
//! services.

pub mod catalog;
pub mod classifier;
pub mod feedback_store;
pub mod ocr;
pub mod trainer;

pub use catalog::CatalogTextLookup;
pub use classifier::{KeywordClassifier, KeywordModel};
pub use feedback_store::JsonlFeedbackStore;
pub use ocr::{CommandOcr, TextFileOcr};
pub use trainer::KeywordTrainer;
