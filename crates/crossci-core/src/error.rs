//! Error types for crossci.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Workflow errors
    #[error("Invalid workflow definition: {0}")]
    InvalidWorkflow(String),

    #[error("Workflow validation failed: {}", .0.join("; "))]
    WorkflowValidation(Vec<String>),

    #[error("Invalid filter pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    // Run errors
    #[error("Run cancelled: {reason}")]
    RunCancelled { reason: String },

    // Step errors
    #[error("Step timeout after {seconds} seconds")]
    StepTimeout { seconds: u64 },

    // Infrastructure errors
    #[error("Container runtime error: {0}")]
    Container(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::InvalidWorkflow(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_joined() {
        let err = Error::WorkflowValidation(vec!["no jobs".into(), "bad pattern".into()]);
        assert_eq!(
            err.to_string(),
            "Workflow validation failed: no jobs; bad pattern"
        );
    }
}
