//! Error taxonomy shared by every stage, collaborator and the CLI boundary.

use std::time::Duration;

use thiserror::Error;

/// Core result type.
pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    /// Container or image listing could not be retrieved.
    #[error("listing failed on {host}: {message}")]
    ListFailure { host: String, message: String },

    /// One external command failed for one item.
    #[error("{operation} failed: {message}")]
    OperationFailure { operation: String, message: String },

    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    ConfigFailure(String),

    /// One backup destination failed.
    #[error("repository {repository} failed: {message}")]
    RepositoryFailure { repository: String, message: String },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

impl BackupError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationFailure {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn list(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ListFailure {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigFailure(message.into())
    }

    pub fn repository(repository: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RepositoryFailure {
            repository: repository.into(),
            message: message.into(),
        }
    }

    /// Short machine-friendly label used in outcome records.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::ListFailure { .. } => "ListFailure",
            BackupError::OperationFailure { .. } => "OperationFailure",
            BackupError::ConfigFailure(_) => "ConfigFailure",
            BackupError::RepositoryFailure { .. } => "RepositoryFailure",
            BackupError::Timeout { .. } => "Timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_names_the_operation() {
        let err = BackupError::Timeout {
            operation: "compress".to_string(),
            after: Duration::from_millis(200),
        };
        assert_eq!(err.to_string(), "compress timed out after 200ms");
        assert_eq!(err.kind(), "Timeout");
    }

    #[test]
    fn repository_failure_names_the_repository() {
        let err = BackupError::repository("/srv/restic/one", "locked");
        assert_eq!(err.to_string(), "repository /srv/restic/one failed: locked");
        assert_eq!(err.kind(), "RepositoryFailure");
    }
}
