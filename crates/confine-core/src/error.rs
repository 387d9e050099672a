//! Error types for launcher operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for launcher operations
pub type Result<T> = std::result::Result<T, ConfineError>;

/// Errors that can occur while building or launching an execution spec.
///
/// Failures that happen inside the forked child are not errors of this kind;
/// they come back as [`crate::TerminationResult::SetupFailed`].
#[derive(Error, Debug)]
pub enum ConfineError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Syscall error: {0}")]
    Syscall(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),

    #[error("Failed to read environment file {}: {source}", path.display())]
    EnvironmentFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Seccomp error: {0}")]
    Seccomp(String),

    #[error("Identity error: {0}")]
    Identity(String),

    #[error("Namespace error: {0}")]
    Namespace(String),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Process monitoring error: {0}")]
    ProcessMonitoring(String),

    #[error("Process already finished")]
    AlreadyFinished,
}

impl ConfineError {
    /// True for errors that describe a spec that can never launch as written.
    ///
    /// These are detected before any process is forked; callers decide
    /// whether they are fatal or a reason to skip.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ConfineError::InvalidConfig(_) | ConfineError::FeatureNotAvailable(_)
        )
    }
}

impl From<nix::Error> for ConfineError {
    fn from(errno: nix::Error) -> Self {
        ConfineError::Syscall(errno.desc().to_string())
    }
}

impl From<serde_json::Error> for ConfineError {
    fn from(err: serde_json::Error) -> Self {
        ConfineError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConfineError::AlreadyFinished;
        assert_eq!(err.to_string(), "Process already finished");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = ConfineError::from(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_configuration_classification() {
        assert!(ConfineError::InvalidConfig("x".into()).is_configuration());
        assert!(ConfineError::FeatureNotAvailable("seccomp".into()).is_configuration());
        assert!(!ConfineError::Mount("x".into()).is_configuration());
        assert!(!ConfineError::AlreadyFinished.is_configuration());
    }

    #[test]
    fn test_environment_file_error_names_path() {
        let err = ConfineError::EnvironmentFile {
            path: PathBuf::from("/etc/missing.conf"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/missing.conf"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn test_from_nix_errno() {
        let err = ConfineError::from(nix::errno::Errno::EPERM);
        assert!(err.to_string().starts_with("Syscall error"));
    }
}
