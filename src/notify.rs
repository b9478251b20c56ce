//! Completion email
//!
//! Sent through a plain SMTP relay without authentication.

use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};
use tracing::info;

use crate::config::settings::NotificationConfig;
use crate::error::{BackupError, BackupResult};

/// A completion notice ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

impl Notice {
    /// `"<filename> backed up in <HH:MM:SS>"`, subject `"Backup of <domain> completed"`
    pub fn completed(domain: &str, filename: &str, elapsed: &str) -> Self {
        Self {
            subject: format!("Backup of {} completed", domain),
            body: format!("{} backed up in {}", filename, elapsed),
        }
    }
}

/// Delivers completion notices
pub trait Notifier {
    fn send(&self, notice: &Notice) -> BackupResult<()>;
}

/// Sends notices as plain-text email
pub struct SmtpNotifier {
    config: NotificationConfig,
    transport: SmtpTransport,
}

impl SmtpNotifier {
    /// Create a new SmtpNotifier
    pub fn new(config: NotificationConfig) -> Self {
        let transport = SmtpTransport::builder_dangerous(config.smtp_host.as_str())
            .port(config.smtp_port)
            .timeout(Some(config.timeout))
            .build();

        Self { config, transport }
    }

    /// Build the email for a notice
    pub fn message(&self, notice: &Notice) -> BackupResult<Message> {
        Message::builder()
            .from(self.config.sender.clone())
            .to(self.config.receiver.clone())
            .subject(notice.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(notice.body.clone())
            .map_err(|e| BackupError::Notification(format!("Failed to build email: {}", e)))
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, notice: &Notice) -> BackupResult<()> {
        let message = self.message(notice)?;

        self.transport.send(&message).map_err(|e| {
            BackupError::Notification(format!(
                "Failed to send email via {}:{}: {}",
                self.config.smtp_host, self.config.smtp_port, e
            ))
        })?;

        info!("Notification sent to {}", self.config.receiver);
        Ok(())
    }
}
