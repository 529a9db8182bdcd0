//! Centralized error types for gitoteko
//!
//! Expected per-action failures are reported through `ActionResult`, never
//! through this enum. `GitotekoError` covers the fatal paths: configuration,
//! provider protocol errors, and git sync failures that abort one repository.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for gitoteko operations
#[derive(Error, Debug)]
pub enum GitotekoError {
    /// Configuration errors (CLI/env validation)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Git provider API errors (HTTP non-2xx, malformed payloads)
    #[error("Provider error: {message}")]
    Provider { message: String },

    /// A git subprocess exited non-zero
    #[error("Git command failed ({exit_code}): {command}\n{details}")]
    GitCommand {
        command: String,
        cwd: PathBuf,
        exit_code: i32,
        details: String,
    },

    /// Git invocation errors (missing executable, timeout, bad working copy)
    #[error("Git error: {message}")]
    Git { message: String },

    /// I/O operation errors
    #[error("I/O error: {path} - {message}")]
    Io { path: PathBuf, message: String },

    /// Sonar server interaction errors
    #[error("Sonar error: {message}")]
    Sonar { message: String },
}

impl GitotekoError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a provider error
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a git error
    pub fn git(message: impl Into<String>) -> Self {
        Self::Git {
            message: message.into(),
        }
    }

    /// Create an I/O error
    pub fn io(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a Sonar error
    pub fn sonar(message: impl Into<String>) -> Self {
        Self::Sonar {
            message: message.into(),
        }
    }
}

/// Result type alias for gitoteko operations
pub type Result<T> = std::result::Result<T, GitotekoError>;

// Conversion from std::io::Error
impl From<std::io::Error> for GitotekoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = GitotekoError::config("missing workspace");
        assert!(err.to_string().contains("Configuration error"));

        let err = GitotekoError::provider("bad payload");
        assert!(err.to_string().contains("Provider error"));
    }

    #[test]
    fn test_git_command_error_includes_details() {
        let err = GitotekoError::GitCommand {
            command: "git pull --ff-only".to_string(),
            cwd: PathBuf::from("/tmp/repo"),
            exit_code: 128,
            details: "fatal: not a git repository".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("128"));
        assert!(rendered.contains("git pull --ff-only"));
        assert!(rendered.contains("fatal: not a git repository"));
    }
}
