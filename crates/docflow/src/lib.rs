//! Docflow runner.
//!
//! Wires the message bus, the coordinator, the built-in collaborators and
//! the five stage handlers together through the manager registry, driven
//! by a TOML configuration.

pub mod app;
pub mod config;
pub mod engines;
pub mod error;
pub mod managers;

pub use app::{build_registry, check, run, topology, QueueRow, RunSummary};
pub use config::AppConfig;
pub use error::HelpfulError;
