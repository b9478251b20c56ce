//! Remote archive transport for backup-fetch
//!
//! Fetches the freshly created backup archive from the web space and removes
//! it there once it is safely on local disk.
//!
//! # Architecture
//!
//! - [`RemoteStore`]: one open session against the remote backup directory
//! - [`RemoteConnector`]: opens a session for the configured protocol
//! - [`fetch`]: list, select, download and delete, closing the session on
//!   every path
//!
//! Two protocols are implemented: FTP over explicit TLS ([`ftps`]) and SFTP
//! ([`sftp`]). Key material for SSH comes from [`keys`].
//!
//! # Archive Naming
//!
//! Archives are named `site-<domain>-<suffix>`. Exactly one archive per domain
//! is expected in the remote directory; zero or several matches abort the
//! fetch before anything is downloaded or deleted.

pub mod ftps;
pub mod keys;
pub mod sftp;

#[cfg(test)]
pub(crate) mod fake;

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::settings::{Protocol, TransportConfig};
use crate::error::{BackupError, BackupResult};

pub use ftps::FtpsStore;
pub use keys::{provider_for, KeyMaterial, KeyMaterialProvider};
pub use sftp::SftpStore;

/// An open session on the remote backup directory
pub trait RemoteStore {
    /// Human readable description of the session, for log lines
    fn describe(&self) -> String;

    /// Names of the entries in the remote backup directory
    fn list(&mut self) -> BackupResult<Vec<String>>;

    /// Stream one remote file into `out`, returning the number of bytes copied
    fn download(&mut self, name: &str, out: &mut dyn Write) -> BackupResult<u64>;

    /// Remove one remote file
    fn delete(&mut self, name: &str) -> BackupResult<()>;

    /// End the session
    fn close(&mut self) -> BackupResult<()>;
}

/// Opens a [`RemoteStore`] for a transport configuration
pub trait RemoteConnector {
    fn connect(&self, config: &TransportConfig) -> BackupResult<Box<dyn RemoteStore>>;
}

/// Connects with the protocol named in the configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtocolConnector;

impl RemoteConnector for ProtocolConnector {
    fn connect(&self, config: &TransportConfig) -> BackupResult<Box<dyn RemoteStore>> {
        match &config.protocol {
            Protocol::Ftp { .. } => Ok(Box::new(FtpsStore::connect(config)?)),
            Protocol::Ssh {
                private_key_path,
                key_passphrase,
                ..
            } => {
                let provider = provider_for(*key_passphrase);
                let key = provider.load(private_key_path)?;
                Ok(Box::new(SftpStore::connect(config, key)?))
            }
        }
    }
}

/// A backup archive fetched from the remote web space
#[derive(Debug, Clone)]
pub struct BackupArchive {
    /// Archive filename, `site-<domain>-<suffix>`
    pub name: String,
    /// Where the archive was on the server
    pub remote_path: String,
    /// Where the archive is now on local disk
    pub local_path: PathBuf,
    /// Local modification time after download
    pub modified: DateTime<Utc>,
    /// Size in bytes
    pub size_bytes: u64,
    /// Whether the remote copy was removed
    pub remote_deleted: bool,
}

/// Fetch the domain's archive into `work_dir`
///
/// The remote copy is deleted only after the local file is completely
/// written. The session is closed whether or not the fetch succeeds.
pub fn fetch(
    connector: &dyn RemoteConnector,
    config: &TransportConfig,
    work_dir: &Path,
) -> BackupResult<BackupArchive> {
    let mut store = connector.connect(config)?;
    info!("Connected using {}", store.describe());

    let result = fetch_from(store.as_mut(), config, work_dir);

    if let Err(e) = store.close() {
        warn!(error = %e, "Failed to close remote session");
    }

    result
}

fn fetch_from(
    store: &mut dyn RemoteStore,
    config: &TransportConfig,
    work_dir: &Path,
) -> BackupResult<BackupArchive> {
    let names = store.list()?;
    debug!(files = ?names, "List of files");

    let name = select_archive(&names, &config.domain, &config.remote_backup_path)?;
    let remote_path = remote_path(&config.remote_backup_path, &name);
    info!("Downloading file {}", name);

    let local_path = work_dir.join(&name);
    let size_bytes = download_to(store, &name, &local_path)?;
    info!("{} downloaded ({} bytes)", name, size_bytes);

    let remote_deleted = match store.delete(&name) {
        Ok(()) => {
            info!("Deleted {} on the server", name);
            true
        }
        Err(e) => {
            warn!(error = %e, "Archive downloaded but the remote copy could not be deleted");
            false
        }
    };

    let modified = fs::metadata(&local_path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(BackupArchive {
        name,
        remote_path,
        local_path,
        modified,
        size_bytes,
        remote_deleted,
    })
}

/// Pick the single entry named `site-<domain>-*`
///
/// Listings that carry a directory prefix are matched on their final
/// component.
pub fn select_archive(names: &[String], domain: &str, directory: &str) -> BackupResult<String> {
    let pattern = archive_pattern(domain)?;

    let mut candidates: Vec<String> = names
        .iter()
        .map(|n| n.rsplit('/').next().unwrap_or(n.as_str()))
        .filter(|n| pattern.is_match(n))
        .map(str::to_string)
        .collect();
    candidates.sort();
    candidates.dedup();

    match candidates.len() {
        0 => Err(BackupError::archive_not_found(domain, directory)),
        1 => Ok(candidates.remove(0)),
        _ => Err(BackupError::AmbiguousMatch {
            domain: domain.to_string(),
            candidates,
        }),
    }
}

fn archive_pattern(domain: &str) -> BackupResult<Regex> {
    Regex::new(&format!("^site-{}-.*$", regex::escape(domain)))
        .map_err(|e| BackupError::Config(format!("Invalid domain '{}': {}", domain, e)))
}

fn remote_path(directory: &str, name: &str) -> String {
    if directory.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", directory.trim_end_matches('/'), name)
}

/// Stream a remote file to `local_path` through a `.part` file
///
/// The partial file is renamed into place only after it is flushed and
/// synced, and removed if anything fails.
fn download_to(store: &mut dyn RemoteStore, name: &str, local_path: &Path) -> BackupResult<u64> {
    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BackupError::Transfer(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let part_path = local_path.with_file_name(format!("{}.part", name));

    let result = write_part(store, name, &part_path).and_then(|size| {
        fs::rename(&part_path, local_path).map_err(|e| {
            BackupError::Transfer(format!(
                "Failed to move {} into place: {}",
                part_path.display(),
                e
            ))
        })?;
        Ok(size)
    });

    if result.is_err() {
        let _ = fs::remove_file(&part_path);
    }

    result
}

fn write_part(store: &mut dyn RemoteStore, name: &str, part_path: &Path) -> BackupResult<u64> {
    let file = File::create(part_path).map_err(|e| {
        BackupError::Transfer(format!("Failed to create {}: {}", part_path.display(), e))
    })?;

    let mut writer = BufWriter::new(file);
    let size = store.download(name, &mut writer)?;

    writer
        .flush()
        .map_err(|e| BackupError::Transfer(format!("Failed to flush {}: {}", name, e)))?;

    writer
        .get_ref()
        .sync_all()
        .map_err(|e| BackupError::Transfer(format!("Failed to sync {}: {}", name, e)))?;

    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeConnector, FakeRemote};
    use super::*;
    use crate::config::settings::Protocol;
    use crate::secret::SecretString;
    use std::time::Duration;
    use tempfile::TempDir;

    fn transport_config(domain: &str) -> TransportConfig {
        TransportConfig {
            protocol: Protocol::Ftp {
                server: "ftp.example.com".into(),
                port: 21,
                username: "backup".into(),
                password: SecretString::new("hunter2"),
            },
            remote_backup_path: "/backups/".into(),
            domain: domain.into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_select_single_match() {
        let listing = names(&["index.html", "site-example.com-20240101.zip", "site-other.org-1.zip"]);
        let selected = select_archive(&listing, "example.com", "/backups/").unwrap();
        assert_eq!(selected, "site-example.com-20240101.zip");
    }

    #[test]
    fn test_select_strips_directory_prefix() {
        let listing = names(&["/backups/site-example.com-20240101.zip"]);
        let selected = select_archive(&listing, "example.com", "/backups/").unwrap();
        assert_eq!(selected, "site-example.com-20240101.zip");
    }

    #[test]
    fn test_select_no_match() {
        let listing = names(&["site-other.org-1.zip", "example.com.zip"]);
        let err = select_archive(&listing, "example.com", "/backups/").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_select_ambiguous() {
        let listing = names(&["site-example.com-2.zip", "site-example.com-1.zip"]);
        let err = select_archive(&listing, "example.com", "/backups/").unwrap_err();
        match err {
            BackupError::AmbiguousMatch { candidates, .. } => {
                assert_eq!(candidates, names(&["site-example.com-1.zip", "site-example.com-2.zip"]));
            }
            other => panic!("Expected ambiguous match, got {:?}", other),
        }
    }

    #[test]
    fn test_select_escapes_domain() {
        // The dot in the domain must not match arbitrary characters
        let listing = names(&["site-exampleXcom-1.zip"]);
        assert!(select_archive(&listing, "example.com", "/").is_err());
    }

    #[test]
    fn test_remote_path_joins() {
        assert_eq!(remote_path("/backups/", "a.zip"), "/backups/a.zip");
        assert_eq!(remote_path("/backups", "a.zip"), "/backups/a.zip");
        assert_eq!(remote_path("", "a.zip"), "a.zip");
    }

    #[test]
    fn test_fetch_downloads_then_deletes() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_files(&[("site-example.com-20240101.zip", "archive bytes")]);
        let connector = FakeConnector::new(remote.clone());

        let archive = fetch(&connector, &transport_config("example.com"), temp_dir.path()).unwrap();

        assert_eq!(archive.name, "site-example.com-20240101.zip");
        assert_eq!(archive.remote_path, "/backups/site-example.com-20240101.zip");
        assert_eq!(archive.size_bytes, 13);
        assert!(archive.remote_deleted);
        assert_eq!(fs::read(&archive.local_path).unwrap(), b"archive bytes");
        assert!(!remote.contains("site-example.com-20240101.zip"));
        assert!(remote.is_closed());
    }

    #[test]
    fn test_failed_download_preserves_remote() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_files(&[("site-example.com-20240101.zip", "archive bytes")]);
        remote.fail_download_after(4);
        let connector = FakeConnector::new(remote.clone());

        let err = fetch(&connector, &transport_config("example.com"), temp_dir.path()).unwrap_err();

        assert!(matches!(err, BackupError::Transfer(_)));
        assert!(remote.contains("site-example.com-20240101.zip"));
        assert!(remote.is_closed());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_failed_delete_keeps_local_copy() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_files(&[("site-example.com-20240101.zip", "archive bytes")]);
        remote.fail_delete();
        let connector = FakeConnector::new(remote.clone());

        let archive = fetch(&connector, &transport_config("example.com"), temp_dir.path()).unwrap();

        assert!(!archive.remote_deleted);
        assert!(archive.local_path.exists());
        assert!(remote.is_closed());
    }

    #[test]
    fn test_not_found_closes_session() {
        let temp_dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_files(&[("site-other.org-1.zip", "x")]);
        let connector = FakeConnector::new(remote.clone());

        let err = fetch(&connector, &transport_config("example.com"), temp_dir.path()).unwrap_err();

        assert!(err.is_not_found());
        assert!(remote.is_closed());
        assert!(remote.contains("site-other.org-1.zip"));
    }

    #[test]
    fn test_connection_failure_propagates() {
        let temp_dir = TempDir::new().unwrap();
        let connector = FakeConnector::refusing();

        let err = fetch(&connector, &transport_config("example.com"), temp_dir.path()).unwrap_err();
        assert!(matches!(err, BackupError::Connection(_)));
    }
}
