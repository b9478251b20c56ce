//! SFTP over SSH
//!
//! Host keys are trusted on first use: an unknown host key is added to the
//! known_hosts file, a changed one refuses the connection.

use std::fs;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

use ssh2::{CheckResult, KnownHostFileKind, Session, Sftp};
use tracing::{debug, info, warn};

use crate::config::paths::default_known_hosts;
use crate::config::settings::{Protocol, TransportConfig};
use crate::error::{BackupError, BackupResult};

use super::keys::KeyMaterial;

const DEFAULT_SSH_PORT: u16 = 22;

/// An authenticated SFTP session on the remote backup directory
pub struct SftpStore {
    sftp: Option<Sftp>,
    session: Session,
    server: String,
    directory: PathBuf,
}

impl SftpStore {
    /// Connect, verify the host key, authenticate and open the SFTP subsystem
    pub fn connect(config: &TransportConfig, key: KeyMaterial) -> BackupResult<Self> {
        let (server, port, username, known_hosts_file) = match &config.protocol {
            Protocol::Ssh {
                server,
                port,
                username,
                known_hosts_file,
                ..
            } => (server, *port, username, known_hosts_file.clone()),
            Protocol::Ftp { .. } => {
                return Err(BackupError::Config(
                    "SFTP transport requires an 'ssh' section".into(),
                ))
            }
        };

        let addr = (server.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| BackupError::Connection(format!("Cannot resolve {}: {}", server, e)))?
            .next()
            .ok_or_else(|| BackupError::Connection(format!("No address for {}", server)))?;

        let tcp = TcpStream::connect_timeout(&addr, config.timeout)
            .map_err(|e| BackupError::Connection(format!("{}: {}", addr, e)))?;

        let mut session = Session::new().map_err(ssh_connection_error)?;
        session.set_timeout(u32::try_from(config.timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(ssh_connection_error)?;

        let known_hosts = known_hosts_file.or_else(default_known_hosts);
        verify_host_key(&session, server, port, known_hosts.as_deref())?;

        session
            .userauth_pubkey_file(
                username,
                None,
                &key.private_key,
                key.passphrase.as_deref(),
            )
            .map_err(|e| {
                BackupError::Connection(format!("Authentication as {} failed: {}", username, e))
            })?;

        if !session.authenticated() {
            return Err(BackupError::Connection(format!(
                "Authentication as {} was rejected",
                username
            )));
        }
        info!("Connected using SSH as {}", username);

        let sftp = session.sftp().map_err(ssh_connection_error)?;

        Ok(Self {
            sftp: Some(sftp),
            session,
            server: server.clone(),
            directory: PathBuf::from(&config.remote_backup_path),
        })
    }

    fn sftp(&self) -> BackupResult<&Sftp> {
        self.sftp
            .as_ref()
            .ok_or_else(|| BackupError::Connection("SFTP session already closed".into()))
    }
}

impl super::RemoteStore for SftpStore {
    fn describe(&self) -> String {
        format!("SFTP {}:{}", self.server, self.directory.display())
    }

    fn list(&mut self) -> BackupResult<Vec<String>> {
        let entries = self.sftp()?.readdir(&self.directory).map_err(|e| {
            BackupError::Connection(format!(
                "Failed to list {}: {}",
                self.directory.display(),
                e
            ))
        })?;

        Ok(entries
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .filter_map(|(path, _)| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect())
    }

    fn download(&mut self, name: &str, out: &mut dyn Write) -> BackupResult<u64> {
        let path = self.directory.join(name);
        let mut remote = self.sftp()?.open(&path).map_err(|e| {
            BackupError::Transfer(format!("Failed to open {}: {}", path.display(), e))
        })?;

        io::copy(&mut remote, out)
            .map_err(|e| BackupError::Transfer(format!("Failed to download {}: {}", name, e)))
    }

    fn delete(&mut self, name: &str) -> BackupResult<()> {
        let path = self.directory.join(name);
        self.sftp()?
            .unlink(&path)
            .map_err(|e| BackupError::Deletion(format!("Failed to delete {}: {}", path.display(), e)))
    }

    fn close(&mut self) -> BackupResult<()> {
        // The SFTP channel must go before the session is torn down
        if self.sftp.take().is_none() {
            return Ok(());
        }
        self.session
            .disconnect(None, "backup complete", None)
            .map_err(ssh_connection_error)
    }
}

/// Check the server's host key against known_hosts, adding it if unknown
fn verify_host_key(
    session: &Session,
    host: &str,
    port: u16,
    known_hosts_file: Option<&Path>,
) -> BackupResult<()> {
    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| BackupError::Connection(format!("{} sent no host key", host)))?;

    let mut known_hosts = session.known_hosts().map_err(ssh_connection_error)?;

    if let Some(path) = known_hosts_file.filter(|p| p.exists()) {
        known_hosts
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| {
                BackupError::Connection(format!("Failed to read {}: {}", path.display(), e))
            })?;
    }

    match known_hosts.check_port(host, port, key) {
        CheckResult::Match => {
            debug!(host, "Host key matches known_hosts");
            Ok(())
        }
        CheckResult::NotFound => {
            let entry = known_hosts_entry(host, port);
            known_hosts
                .add(&entry, key, "added by backup-fetch", key_type.into())
                .map_err(ssh_connection_error)?;

            match known_hosts_file {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    known_hosts
                        .write_file(path, KnownHostFileKind::OpenSSH)
                        .map_err(|e| {
                            BackupError::Connection(format!(
                                "Failed to write {}: {}",
                                path.display(),
                                e
                            ))
                        })?;
                    info!("Trusted new host key for {}", entry);
                }
                None => warn!("Trusting host key for {} for this session only", entry),
            }
            Ok(())
        }
        CheckResult::Mismatch => Err(BackupError::Connection(format!(
            "Host key for {} does not match known_hosts",
            host
        ))),
        CheckResult::Failure => Err(BackupError::Connection(format!(
            "Could not check the host key for {}",
            host
        ))),
    }
}

/// known_hosts spells non-default ports as `[host]:port`
fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == DEFAULT_SSH_PORT {
        host.to_string()
    } else {
        format!("[{}]:{}", host, port)
    }
}

fn ssh_connection_error(err: ssh2::Error) -> BackupError {
    BackupError::Connection(err.to_string())
}
