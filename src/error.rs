//! Custom error types for backup-fetch
//!
//! This module defines the error hierarchy for one backup cycle using thiserror
//! for ergonomic error definitions.

use thiserror::Error;

/// The main error type for backup-fetch operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Missing or mistyped settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport authentication or network failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// No remote file matches the domain pattern
    #[error("No backup archive for '{domain}' found in {directory}")]
    NotFound { domain: String, directory: String },

    /// More than one remote file matches the domain pattern
    #[error("Ambiguous backup archives for '{domain}': {}", candidates.join(", "))]
    AmbiguousMatch {
        domain: String,
        candidates: Vec<String>,
    },

    /// Download failed partway
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Remote cleanup failed after a successful download
    #[error("Deletion error: {0}")]
    Deletion(String),

    /// A stale local archive could not be removed
    #[error("Failed to prune {path}: {reason}")]
    Prune { path: String, reason: String },

    /// Copy or move of the fetched archive failed
    #[error("Placement error: {0}")]
    Placement(String),

    /// The remote backup job could not be started
    #[error("Trigger error: {0}")]
    Trigger(String),

    /// The completion email could not be sent
    #[error("Notification error: {0}")]
    Notification(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl BackupError {
    /// Create a "not found" error for a domain's archive
    pub fn archive_not_found(domain: impl Into<String>, directory: impl Into<String>) -> Self {
        Self::NotFound {
            domain: domain.into(),
            directory: directory.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a configuration error
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Whether this failure aborts the backup cycle
    ///
    /// Remote cleanup, pruning and notification failures happen after the
    /// archive is already safe locally, so they are only logged.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::Deletion(_) | Self::Prune { .. } | Self::Notification(_)
        )
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BackupError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for backup-fetch operations
pub type BackupResult<T> = Result<T, BackupError>;
