use thiserror::Error;

/// Configuration errors of the manager graph. All of them abort startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("manager '{0}' is already registered")]
    DuplicateName(String),

    #[error("manager kind '{0}' has two constructors")]
    DuplicateKind(String),

    #[error("registry is already initialized")]
    AlreadyInitialized,

    #[error("manager '{manager}' depends on unregistered manager '{dependency}'")]
    MissingDependency { manager: String, dependency: String },

    #[error("manager '{manager}' has unknown kind '{kind}'")]
    UnknownKind { manager: String, kind: String },

    /// `members` holds every manager left unordered: the cycle itself plus
    /// anything that depends on it.
    #[error("dependency cycle; unresolved managers: {}", members.join(", "))]
    Cycle { members: Vec<String> },

    #[error("failed to construct manager '{manager}'")]
    Construction {
        manager: String,
        source: anyhow::Error,
    },

    #[error("failed to start manager '{manager}'")]
    Start {
        manager: String,
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
