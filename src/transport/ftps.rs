//! FTP over explicit TLS
//!
//! The control connection is upgraded with `AUTH TLS` and the data channel is
//! protected (`PBSZ 0`, `PROT P`) before logging in. Control and passive data
//! connections share the transport timeout.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream};
use tracing::info;

use crate::config::settings::{Protocol, TransportConfig};
use crate::error::{BackupError, BackupResult};

/// An authenticated FTPS session inside the remote backup directory
pub struct FtpsStore {
    stream: Option<NativeTlsFtpStream>,
    server: String,
    directory: String,
}

impl FtpsStore {
    /// Connect, secure, log in and change to the remote backup directory
    pub fn connect(config: &TransportConfig) -> BackupResult<Self> {
        let (server, port, username, password) = match &config.protocol {
            Protocol::Ftp {
                server,
                port,
                username,
                password,
            } => (server, *port, username, password),
            Protocol::Ssh { .. } => {
                return Err(BackupError::Config(
                    "FTPS transport requires an 'ftp' section".into(),
                ))
            }
        };

        let addr = resolve(server, port)?;
        let stream = NativeTlsFtpStream::connect_timeout(addr, config.timeout)
            .map_err(|e| connection_error(server, e))?;

        stream
            .get_ref()
            .set_read_timeout(Some(config.timeout))
            .map_err(|e| BackupError::Connection(format!("{}: {}", server, e)))?;

        let tls = TlsConnector::new()
            .map_err(|e| BackupError::Connection(format!("TLS setup failed: {}", e)))?;
        let timeout = config.timeout;
        let mut stream = stream
            .into_secure(NativeTlsConnector::from(tls), server)
            .map_err(|e| connection_error(server, e))?
            .passive_stream_builder(move |addr: SocketAddr| {
                data_connection(addr, timeout).map_err(FtpError::ConnectionError)
            });

        stream
            .login(username.as_str(), password.expose())
            .map_err(|e| connection_error(server, e))?;
        info!("Logged into FTP as {}", username);

        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| connection_error(server, e))?;

        stream
            .cwd(config.remote_backup_path.as_str())
            .map_err(|e| {
                BackupError::Connection(format!(
                    "Cannot change to {}: {}",
                    config.remote_backup_path, e
                ))
            })?;

        Ok(Self {
            stream: Some(stream),
            server: server.clone(),
            directory: config.remote_backup_path.clone(),
        })
    }

    fn stream(&mut self) -> BackupResult<&mut NativeTlsFtpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| BackupError::Connection("FTPS session already closed".into()))
    }
}

impl std::fmt::Debug for FtpsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpsStore")
            .field("server", &self.server)
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl super::RemoteStore for FtpsStore {
    fn describe(&self) -> String {
        format!("FTPS {}:{}", self.server, self.directory)
    }

    fn list(&mut self) -> BackupResult<Vec<String>> {
        self.stream()?
            .nlst(None)
            .map_err(|e| BackupError::Connection(format!("Failed to list remote files: {}", e)))
    }

    fn download(&mut self, name: &str, out: &mut dyn Write) -> BackupResult<u64> {
        self.stream()?
            .retr(name, |reader| io::copy(reader, &mut *out).map_err(FtpError::ConnectionError))
            .map_err(|e| BackupError::Transfer(format!("Failed to download {}: {}", name, e)))
    }

    fn delete(&mut self, name: &str) -> BackupResult<()> {
        self.stream()?
            .rm(name)
            .map_err(|e| BackupError::Deletion(format!("Failed to delete {}: {}", name, e)))
    }

    fn close(&mut self) -> BackupResult<()> {
        match self.stream.take() {
            Some(mut stream) => stream
                .quit()
                .map_err(|e| BackupError::Connection(format!("QUIT failed: {}", e))),
            None => Ok(()),
        }
    }
}

fn resolve(server: &str, port: u16) -> BackupResult<SocketAddr> {
    (server, port)
        .to_socket_addrs()
        .map_err(|e| BackupError::Connection(format!("Cannot resolve {}: {}", server, e)))?
        .next()
        .ok_or_else(|| BackupError::Connection(format!("No address for {}", server)))
}

/// Open a passive data connection with bounded connect, read and write waits
fn data_connection(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(stream)
}

fn connection_error(server: &str, err: FtpError) -> BackupError {
    BackupError::Connection(format!("{}: {}", server, err))
}
