//! backup-fetch - Pull CMS backups to local storage
//!
//! This library triggers a remote CMS backup job, retrieves the resulting
//! archive over FTP-over-TLS or SFTP, rotates local short-term and long-term
//! storage, and emails a completion notice.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Settings file parsing, validation and default paths
//! - `error`: Custom error types
//! - `logging`: Console and file log output
//! - `trigger`: HTTP call that starts the remote backup
//! - `transport`: Remote archive discovery, download and deletion
//! - `rotation`: Retention of local archives
//! - `notify`: Completion email
//! - `orchestrator`: Sequencing of one backup cycle
//!
//! # Example
//!
//! ```rust,ignore
//! use backup_fetch::orchestrator::{self, Services, SystemClock};
//!
//! let report = orchestrator::run(&config_path, &SystemClock, Services::production)?;
//! println!("{} backed up in {}", report.archive.name, report.elapsed);
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod rotation;
pub mod secret;
pub mod transport;
pub mod trigger;

pub use error::{BackupError, BackupResult};
