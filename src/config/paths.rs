//! Path management for backup-fetch
//!
//! Resolves where the settings file and the persistent log live.
//!
//! ## Path Resolution Order
//!
//! 1. `BACKUP_FETCH_HOME` environment variable (if set)
//! 2. The platform config directory for `backup-fetch`
//!    (`~/.config/backup-fetch` on Linux)

use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};

use crate::error::BackupError;

/// Manages the default paths used by backup-fetch
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Base directory holding settings and log
    base_dir: PathBuf,
}

impl AppPaths {
    /// Create a new AppPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined and
    /// `BACKUP_FETCH_HOME` is not set.
    pub fn new() -> Result<Self, BackupError> {
        let base_dir = if let Ok(custom) = std::env::var("BACKUP_FETCH_HOME") {
            PathBuf::from(custom)
        } else {
            ProjectDirs::from("", "", "backup-fetch")
                .map(|dirs| dirs.config_dir().to_path_buf())
                .ok_or_else(|| {
                    BackupError::Config("Could not determine the config directory".into())
                })?
        };

        Ok(Self { base_dir })
    }

    /// Create AppPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("settings.yaml")
    }

    /// Get the path to the persistent log
    pub fn log_file(&self) -> PathBuf {
        self.base_dir.join("backup-fetch.log")
    }
}

/// The user's OpenSSH known_hosts file
pub fn default_known_hosts() -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.home_dir().join(".ssh").join("known_hosts"))
}
