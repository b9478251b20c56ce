//! Configuration module for backup-fetch
//!
//! This module provides configuration management including:
//! - Default path resolution for the settings file and log
//! - Settings file parsing and validation

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    BackupConfig, KeyPassphrase, NotificationConfig, Protocol, RetentionPolicy, TransportConfig,
    TriggerConfig,
};
