//! Unified error types for the trackman workflow runner.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Main error type surfaced by loading and running workflows
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error in step {step}: {message}")]
    Template { step: String, message: String },

    #[error("Step {step} failed to start: {source}")]
    Start {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Step {step} timed out after {budget:?}")]
    Timeout { step: String, budget: Duration },

    #[error("Step {step} exited with {status}")]
    Exit { step: String, status: ExitStatus },

    #[error("Step {step} could not be waited on: {source}")]
    Wait {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Step {step} was cancelled")]
    Cancelled { step: String },

    #[error("Failed to parse workflow: {0}")]
    Load(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Whether the error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the error comes from caller cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Exit status of a child that exited non-zero
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self {
            Self::Exit { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Configuration and document validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Step {0} is not linked to a workflow")]
    UnlinkedStep(String),

    #[error("Step {0} has no probe")]
    MissingProbe(String),

    #[error("Duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("Step not found: {0}")]
    StepNotFound(String),

    #[error("Invalid timeout for {0}: must be positive")]
    InvalidTimeout(String),

    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Notifier delivery errors; logged and dropped, never surfaced from a run
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notifier {name} failed: {message}")]
    Failed { name: String, message: String },

    #[error("Notifier {0} timed out")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NotifyError {
    /// Create a failure for the named notifier
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for the runner
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Result type alias for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_step_and_budget() {
        let err = RunnerError::Timeout {
            step: "slow".to_string(),
            budget: Duration::from_millis(100),
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Step slow timed out after 100ms");
    }

    #[test]
    fn test_config_error_converts() {
        let err: RunnerError = ConfigError::DuplicateStep("build".to_string()).into();
        assert!(matches!(err, RunnerError::Config(ConfigError::DuplicateStep(_))));
        assert!(err.exit_status().is_none());
    }
}
