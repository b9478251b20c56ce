//! Local retention for fetched archives
//!
//! # Retention Policy
//!
//! Archives live in two directories:
//! - short-term storage receives every fetched archive and keeps it for
//!   `short_term_retention` days
//! - long-term storage receives a copy once a week, on the archive day, and
//!   keeps it for `long_term_retention` weeks
//!
//! Ages are measured from each file's modification time. A file is removed
//! only once its age strictly exceeds the retention period. The archive day
//! is evaluated in UTC.
//!
//! # Example
//!
//! ```rust,ignore
//! use backup_fetch::rotation::RetentionRotator;
//!
//! let rotator = RetentionRotator::new(config.retention.clone());
//! let result = rotator.rotate(Some(&archive.local_path), chrono::Utc::now())?;
//! ```

mod rotator;

pub use rotator::{prune_expired, RemoveFile, RetentionRotator, RotationResult};
