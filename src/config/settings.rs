//! Settings file for backup-fetch
//!
//! The settings file has three sections: `settings` (paths, retention and the
//! trigger URL), exactly one transport section (`ftp` or `ssh`), and `e-mail`.
//! It is parsed into raw section structs, then validated into a
//! [`BackupConfig`] that stays immutable for the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use lettre::message::Mailbox;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{BackupError, BackupResult};
use crate::secret::SecretString;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    settings: GeneralSection,
    #[serde(default)]
    ftp: Option<FtpSection>,
    #[serde(default)]
    ssh: Option<SshSection>,
    #[serde(rename = "e-mail")]
    email: EmailSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GeneralSection {
    remote_backup_path: String,
    trigger_url: String,
    short_term_retention: u32,
    long_term_retention: u32,
    short_term_path: PathBuf,
    long_term_path: PathBuf,
    domain: String,
    #[serde(default = "default_work_dir")]
    work_dir: PathBuf,
    #[serde(default = "default_archive_weekday")]
    archive_weekday: String,
    #[serde(default = "default_trigger_timeout")]
    trigger_timeout_secs: u64,
    #[serde(default = "default_transport_timeout")]
    transport_timeout_secs: u64,
    #[serde(default = "default_max_redirects")]
    max_redirects: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FtpSection {
    server: String,
    #[serde(default = "default_ftp_port")]
    port: u16,
    username: String,
    password: SecretString,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SshSection {
    server: String,
    username: String,
    port: u16,
    pkey_file: PathBuf,
    #[serde(default)]
    key_passphrase: KeyPassphrase,
    #[serde(default)]
    known_hosts_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EmailSection {
    sender: String,
    receiver: String,
    smtp_server: String,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_archive_weekday() -> String {
    "sunday".to_string()
}

fn default_trigger_timeout() -> u64 {
    3600
}

fn default_transport_timeout() -> u64 {
    120
}

fn default_max_redirects() -> usize {
    20
}

fn default_ftp_port() -> u16 {
    21
}

const DEFAULT_SMTP_PORT: u16 = 25;

/// Where the passphrase of an SSH private key comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyPassphrase {
    /// The key file is not encrypted
    #[default]
    None,
    /// Looked up in the platform secret store
    Keyring,
    /// Read from the terminal
    Prompt,
}

/// Protocol-specific connection settings
#[derive(Debug, Clone)]
pub enum Protocol {
    Ftp {
        server: String,
        port: u16,
        username: String,
        password: SecretString,
    },
    Ssh {
        server: String,
        port: u16,
        username: String,
        private_key_path: PathBuf,
        key_passphrase: KeyPassphrase,
        known_hosts_file: Option<PathBuf>,
    },
}

impl Protocol {
    /// Short protocol name for log lines
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Ftp { .. } => "FTPS",
            Protocol::Ssh { .. } => "SFTP",
        }
    }
}

/// Everything a transport needs to find and fetch the archive
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub protocol: Protocol,
    pub remote_backup_path: String,
    pub domain: String,
    pub timeout: Duration,
}

/// Local retention rules
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub short_term_days: u32,
    pub long_term_weeks: u32,
    pub short_term_path: PathBuf,
    pub long_term_path: PathBuf,
    /// Day (UTC) on which a long-term copy is kept
    pub archive_weekday: Weekday,
}

/// The HTTP call that starts the remote backup job
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub url: Url,
    pub timeout: Duration,
    pub max_redirects: usize,
}

/// Completion email settings
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub sender: Mailbox,
    pub receiver: Mailbox,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub domain: String,
    pub timeout: Duration,
}

/// Validated configuration for one backup cycle
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub transport: TransportConfig,
    pub retention: RetentionPolicy,
    pub trigger: TriggerConfig,
    pub notification: NotificationConfig,
    /// Where the archive lands before rotation
    pub work_dir: PathBuf,
}

impl BackupConfig {
    /// Load and validate a settings file
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> BackupResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!(
                "Failed to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path.extension().map_or(false, |ext| ext == "json");
        let raw: SettingsFile = if is_json {
            serde_json::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            serde_yaml::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };

        raw.validate()
    }

    /// Parse and validate YAML settings
    pub fn from_yaml_str(contents: &str) -> BackupResult<Self> {
        let raw: SettingsFile = serde_yaml::from_str(contents)?;
        raw.validate()
    }
}

impl SettingsFile {
    fn validate(self) -> BackupResult<BackupConfig> {
        let general = self.settings;

        require_non_empty("settings.domain", &general.domain)?;
        require_non_empty("settings.remote_backup_path", &general.remote_backup_path)?;
        require_non_empty_path("settings.short_term_path", &general.short_term_path)?;
        require_non_empty_path("settings.long_term_path", &general.long_term_path)?;

        let protocol = match (self.ftp, self.ssh) {
            (Some(ftp), None) => {
                require_non_empty("ftp.server", &ftp.server)?;
                require_non_empty("ftp.username", &ftp.username)?;
                Protocol::Ftp {
                    server: ftp.server,
                    port: ftp.port,
                    username: ftp.username,
                    password: ftp.password,
                }
            }
            (None, Some(ssh)) => {
                require_non_empty("ssh.server", &ssh.server)?;
                require_non_empty("ssh.username", &ssh.username)?;
                require_non_empty_path("ssh.pkey_file", &ssh.pkey_file)?;
                Protocol::Ssh {
                    server: ssh.server,
                    port: ssh.port,
                    username: ssh.username,
                    private_key_path: ssh.pkey_file,
                    key_passphrase: ssh.key_passphrase,
                    known_hosts_file: ssh.known_hosts_file,
                }
            }
            (Some(_), Some(_)) => {
                return Err(BackupError::Config(
                    "Both 'ftp' and 'ssh' sections are present; configure exactly one".into(),
                ))
            }
            (None, None) => {
                return Err(BackupError::Config(
                    "Neither an 'ftp' nor an 'ssh' section is present; configure exactly one"
                        .into(),
                ))
            }
        };

        let url = parse_trigger_url(&general.trigger_url)?;

        let archive_weekday: Weekday = general.archive_weekday.parse().map_err(|_| {
            BackupError::Config(format!(
                "settings.archive_weekday: '{}' is not a day of the week",
                general.archive_weekday
            ))
        })?;

        let sender = parse_mailbox("e-mail.sender", &self.email.sender)?;
        let receiver = parse_mailbox("e-mail.receiver", &self.email.receiver)?;
        let (smtp_host, smtp_port) = split_host_port(&self.email.smtp_server)?;

        let trigger_timeout = positive_timeout(
            "settings.trigger_timeout_secs",
            general.trigger_timeout_secs,
        )?;
        let transport_timeout = positive_timeout(
            "settings.transport_timeout_secs",
            general.transport_timeout_secs,
        )?;

        Ok(BackupConfig {
            transport: TransportConfig {
                protocol,
                remote_backup_path: general.remote_backup_path,
                domain: general.domain.clone(),
                timeout: transport_timeout,
            },
            retention: RetentionPolicy {
                short_term_days: general.short_term_retention,
                long_term_weeks: general.long_term_retention,
                short_term_path: general.short_term_path,
                long_term_path: general.long_term_path,
                archive_weekday,
            },
            trigger: TriggerConfig {
                url,
                timeout: trigger_timeout,
                max_redirects: general.max_redirects,
            },
            notification: NotificationConfig {
                sender,
                receiver,
                smtp_host,
                smtp_port,
                domain: general.domain,
                timeout: transport_timeout,
            },
            work_dir: general.work_dir,
        })
    }
}

fn require_non_empty(key: &str, value: &str) -> BackupResult<()> {
    if value.trim().is_empty() {
        return Err(BackupError::Config(format!("{} must not be empty", key)));
    }
    Ok(())
}

fn require_non_empty_path(key: &str, value: &Path) -> BackupResult<()> {
    if value.as_os_str().is_empty() {
        return Err(BackupError::Config(format!("{} must not be empty", key)));
    }
    Ok(())
}

/// A zero timeout makes every connect and request fail immediately
fn positive_timeout(key: &str, secs: u64) -> BackupResult<Duration> {
    if secs == 0 {
        return Err(BackupError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_trigger_url(raw: &str) -> BackupResult<Url> {
    let url = Url::parse(raw).map_err(|e| {
        BackupError::Config(format!("settings.trigger_url '{}' is invalid: {}", raw, e))
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(BackupError::Config(format!(
            "settings.trigger_url must use http or https, not '{}'",
            other
        ))),
    }
}

fn parse_mailbox(key: &str, raw: &str) -> BackupResult<Mailbox> {
    raw.parse()
        .map_err(|e| BackupError::Config(format!("{} '{}' is not a valid address: {}", key, raw, e)))
}

/// Split `host[:port]`, defaulting to the plain SMTP port
///
/// IPv6 relays must be bracketed: `[::1]` or `[::1]:2525`.
fn split_host_port(raw: &str) -> BackupResult<(String, u16)> {
    require_non_empty("e-mail.smtp_server", raw)?;

    let invalid = |reason: &str| {
        BackupError::Config(format!("e-mail.smtp_server '{}': {}", raw, reason))
    };
    let parse_port = |port: &str| port.parse::<u16>().map_err(|_| invalid("invalid port"));

    if let Some(bracketed) = raw.strip_prefix('[') {
        let (host, rest) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("missing ']'"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = match rest {
            "" => DEFAULT_SMTP_PORT,
            _ => parse_port(rest.strip_prefix(':').ok_or_else(|| invalid("expected ':' after ']'"))?)?,
        };
        return Ok((host.to_string(), port));
    }

    match raw.matches(':').count() {
        0 => Ok((raw.to_string(), DEFAULT_SMTP_PORT)),
        1 => {
            let (host, port) = raw.split_once(':').ok_or_else(|| invalid("invalid port"))?;
            if host.is_empty() {
                return Err(invalid("empty host"));
            }
            Ok((host.to_string(), parse_port(port)?))
        }
        _ => Err(invalid("IPv6 addresses must be written as [addr] or [addr]:port")),
    }
}
