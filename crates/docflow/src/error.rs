//! Operator-facing errors with suggestions.

use std::fmt;
use std::path::Path;

/// An error that tells the operator what to try next.
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn config_not_found(path: &Path) -> Self {
        Self::new(format!("Config file not found: {}", path.display()))
            .with_context("Every --config path (or DOCFLOW_CONFIG) must point to a TOML file")
            .with_suggestions([
                format!("TRY: Check the path exists: ls -la {}", path.display()),
                "TRY: Run without --config to use the built-in pipeline".to_string(),
            ])
    }

    pub fn broker_unreachable(url: &str) -> Self {
        Self::new(format!("Cannot connect to broker at {}", url))
            .with_context("The message bus makes exactly one connection attempt at startup")
            .with_suggestions([
                "TRY: Check the broker is running and the URL is right".to_string(),
                "TRY: Use --broker-url memory:// for an in-process broker".to_string(),
                "TRY: amqp:// URLs need a build with --features amqp".to_string(),
            ])
    }

    pub fn no_bus_manager() -> Self {
        Self::new("No manager of kind 'message_bus' is configured")
            .with_context("Documents are submitted through the message bus")
            .with_suggestions([
                "TRY: Add a [[managers]] entry with kind = \"message_bus\"",
                "TRY: Remove [[managers]] to use the built-in pipeline",
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR: {}", self.message)?;
        if let Some(context) = &self.context {
            write!(f, "\n\n{}", context)?;
        }
        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                write!(f, "\n{}", suggestion)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for HelpfulError {}
