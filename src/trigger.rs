//! Remote backup trigger
//!
//! The CMS builds its backup while serving the trigger URL, usually through a
//! chain of redirects. The response body is read to the end so the job runs
//! to completion before the archive is fetched.

use std::io;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use reqwest::Url;
use tracing::{debug, info};

use crate::config::settings::TriggerConfig;
use crate::error::{BackupError, BackupResult};

/// Starts the remote backup job
pub trait BackupTrigger {
    fn trigger(&self, url: &Url) -> BackupResult<()>;
}

/// Blocking HTTP GET with a bounded redirect chain and a request timeout
pub struct HttpTrigger {
    client: Client,
}

impl HttpTrigger {
    /// Create a new HttpTrigger
    pub fn new(config: &TriggerConfig) -> BackupResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::limited(config.max_redirects))
            .user_agent(concat!("backup-fetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackupError::Trigger(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl BackupTrigger for HttpTrigger {
    fn trigger(&self, url: &Url) -> BackupResult<()> {
        info!("Hitting the URL to start the remote backup");

        let mut response = self.client.get(url.clone()).send().map_err(|e| {
            if e.is_redirect() {
                BackupError::Trigger(format!("Too many redirects from {}", url.host_str().unwrap_or("")))
            } else if e.is_timeout() {
                BackupError::Trigger("Timed out waiting for the backup to finish".to_string())
            } else {
                BackupError::Trigger(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackupError::Trigger(format!(
                "Server returned {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let drained = io::copy(&mut response, &mut io::sink())
            .map_err(|e| BackupError::Trigger(format!("Failed to read response: {}", e)))?;
        debug!(status = status.as_u16(), bytes = drained, final_url = %response.url(), "Trigger response");

        info!("Backup created");
        Ok(())
    }
}
