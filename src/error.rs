//! Error handling module for prodstack
//!
//! Provides the crate-wide error type. Collaborators (package manager,
//! database engine, application installer) return `anyhow::Result` with
//! context; the orchestrator folds those into `ProvisionError::Step` so the
//! failing step is always named.

use thiserror::Error;

use crate::types::StepName;

/// Main error type for prodstack
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// IO errors (file operations, terminal, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors (loading, validation, unknown backend variant)
    #[error("Configuration error: {0}")]
    Config(String),

    /// One or more host requirements are missing
    #[error("Requirements not satisfied: {0}")]
    Requirements(String),

    /// A provisioning step failed and the run cannot continue
    #[error("Step '{step}' failed: {message}")]
    Step { step: StepName, message: String },

    /// Operator input could not be read (closed stdin, exhausted answers)
    #[error("Prompt error: {0}")]
    Prompt(String),

    /// An external command could not be spawned
    #[error("Command error: {0}")]
    Command(String),

    /// Install state machine transition errors
    #[error("Install transition error: {0}")]
    InstallTransition(String),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for prodstack operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a requirements error
    pub fn requirements(msg: impl Into<String>) -> Self {
        Self::Requirements(msg.into())
    }

    /// Create a step failure carrying the step identity
    pub fn step(step: StepName, msg: impl Into<String>) -> Self {
        Self::Step {
            step,
            message: msg.into(),
        }
    }

    /// Create a prompt error
    pub fn prompt(msg: impl Into<String>) -> Self {
        Self::Prompt(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create an install transition error
    pub fn install_transition(msg: impl Into<String>) -> Self {
        Self::InstallTransition(msg.into())
    }

    /// Create a general error
    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProvisionError::config("unknown web server 'caddy'");
        assert_eq!(
            err.to_string(),
            "Configuration error: unknown web server 'caddy'"
        );

        let err = ProvisionError::step(StepName::InstallPackages, "apt-get exited with 100");
        assert_eq!(
            err.to_string(),
            "Step 'install-packages' failed: apt-get exited with 100"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ProvisionError = io_err.into();
        assert!(matches!(err, ProvisionError::Io(_)));
    }

    #[test]
    fn test_error_constructors() {
        let err = ProvisionError::prompt("stdin closed");
        assert!(matches!(err, ProvisionError::Prompt(_)));

        let err = ProvisionError::command("apt-get not found");
        assert!(matches!(err, ProvisionError::Command(_)));

        let err = ProvisionError::requirements("missing: git");
        assert!(matches!(err, ProvisionError::Requirements(_)));
    }
}
