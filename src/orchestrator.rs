//! Backup cycle sequencing
//!
//! One invocation runs one cycle: load settings, trigger the remote backup,
//! fetch the archive, rotate local storage and send the completion email.
//! Configuration and transport failures abort before anything destructive
//! happens; pruning and notification failures are logged and the cycle
//! still succeeds.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::settings::BackupConfig;
use crate::error::BackupResult;
use crate::notify::{Notice, Notifier, SmtpNotifier};
use crate::rotation::{RetentionRotator, RotationResult};
use crate::transport::{self, BackupArchive, ProtocolConnector, RemoteConnector};
use crate::trigger::{BackupTrigger, HttpTrigger};

/// Source of wall-clock time
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The external collaborators of a cycle
pub struct Services {
    pub trigger: Box<dyn BackupTrigger>,
    pub connector: Box<dyn RemoteConnector>,
    pub notifier: Box<dyn Notifier>,
}

impl Services {
    /// HTTP trigger, protocol transport and SMTP notifier built from settings
    pub fn production(config: &BackupConfig) -> BackupResult<Self> {
        Ok(Self {
            trigger: Box::new(HttpTrigger::new(&config.trigger)?),
            connector: Box::new(ProtocolConnector),
            notifier: Box::new(SmtpNotifier::new(config.notification.clone())),
        })
    }
}

/// Outcome of a successful cycle
#[derive(Debug)]
pub struct CycleReport {
    pub archive: BackupArchive,
    pub rotation: RotationResult,
    /// Wall-clock duration as `HH:MM:SS`
    pub elapsed: String,
    pub notified: bool,
}

/// Load settings from `config_path` and run one backup cycle
///
/// `make_services` is only called once the settings are valid, so a bad
/// configuration never reaches the network.
pub fn run<F>(config_path: &Path, clock: &dyn Clock, make_services: F) -> BackupResult<CycleReport>
where
    F: FnOnce(&BackupConfig) -> BackupResult<Services>,
{
    let started = clock.now();

    debug!("Settings file: {}", config_path.display());
    let config = BackupConfig::load(config_path)?;
    let services = make_services(&config)?;

    run_cycle(&config, &services, clock, started)
}

/// Run one backup cycle with validated settings
pub fn run_cycle(
    config: &BackupConfig,
    services: &Services,
    clock: &dyn Clock,
    started: DateTime<Utc>,
) -> BackupResult<CycleReport> {
    services.trigger.trigger(&config.trigger.url)?;

    let archive = transport::fetch(
        services.connector.as_ref(),
        &config.transport,
        &config.work_dir,
    )?;

    let rotator = RetentionRotator::new(config.retention.clone());
    let rotation = rotator.rotate(Some(&archive.local_path), clock.now())?;

    let elapsed = format_elapsed(clock.now() - started);
    let notice = Notice::completed(&config.notification.domain, &archive.name, &elapsed);

    let notified = match services.notifier.send(&notice) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Backup succeeded but the notification was not sent");
            false
        }
    };

    info!("Backup procedure completed in {}", elapsed);

    Ok(CycleReport {
        archive,
        rotation,
        elapsed,
        notified,
    })
}

/// Format a duration as zero-padded `HH:MM:SS`
///
/// Hours keep counting past 24; negative durations format as zero.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}
