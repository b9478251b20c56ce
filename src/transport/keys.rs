//! SSH key material
//!
//! A private key file is used either as-is or together with a passphrase
//! looked up from the platform secret store or typed at the terminal. The
//! source is chosen by the `ssh.key_passphrase` setting.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::settings::KeyPassphrase;
use crate::error::{BackupError, BackupResult};
use crate::secret::SecretString;

/// Secret store service under which key passphrases are kept
pub const KEYRING_SERVICE: &str = "SSH";

/// A private key file plus the passphrase that unlocks it, if any
#[derive(Debug, Clone)]
pub struct KeyMaterial {
    pub private_key: PathBuf,
    pub passphrase: Option<SecretString>,
}

/// Resolves the key material for a private key file
pub trait KeyMaterialProvider {
    fn load(&self, private_key: &Path) -> BackupResult<KeyMaterial>;
}

/// A key file that is not passphrase protected
#[derive(Debug, Default)]
pub struct UnprotectedKeyFile;

impl KeyMaterialProvider for UnprotectedKeyFile {
    fn load(&self, private_key: &Path) -> BackupResult<KeyMaterial> {
        ensure_key_file(private_key)?;
        Ok(KeyMaterial {
            private_key: private_key.to_path_buf(),
            passphrase: None,
        })
    }
}

/// Passphrase stored in the platform secret store, keyed by the key path
#[derive(Debug)]
pub struct KeyringPassphrase {
    service: String,
}

impl KeyringPassphrase {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringPassphrase {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyMaterialProvider for KeyringPassphrase {
    fn load(&self, private_key: &Path) -> BackupResult<KeyMaterial> {
        ensure_key_file(private_key)?;

        let account = private_key.to_string_lossy();
        debug!(service = %self.service, account = %account, "Looking up key passphrase");

        let entry = keyring::Entry::new(&self.service, &account).map_err(|e| {
            BackupError::Connection(format!("Failed to access secret store: {}", e))
        })?;
        let passphrase = entry.get_password().map_err(|e| {
            BackupError::Connection(format!(
                "No passphrase for {} in secret store: {}",
                private_key.display(),
                e
            ))
        })?;

        Ok(KeyMaterial {
            private_key: private_key.to_path_buf(),
            passphrase: Some(SecretString::new(passphrase)),
        })
    }
}

/// Passphrase typed at the terminal
#[derive(Debug, Default)]
pub struct PromptPassphrase;

impl KeyMaterialProvider for PromptPassphrase {
    fn load(&self, private_key: &Path) -> BackupResult<KeyMaterial> {
        ensure_key_file(private_key)?;

        let prompt = format!("Passphrase for {}: ", private_key.display());
        let passphrase = rpassword::prompt_password(prompt)
            .map_err(|e| BackupError::Connection(format!("Failed to read passphrase: {}", e)))?;

        Ok(KeyMaterial {
            private_key: private_key.to_path_buf(),
            passphrase: Some(SecretString::new(passphrase)),
        })
    }
}

/// The provider selected by the `ssh.key_passphrase` setting
pub fn provider_for(source: KeyPassphrase) -> Box<dyn KeyMaterialProvider> {
    match source {
        KeyPassphrase::None => Box::new(UnprotectedKeyFile),
        KeyPassphrase::Keyring => Box::new(KeyringPassphrase::default()),
        KeyPassphrase::Prompt => Box::new(PromptPassphrase),
    }
}

fn ensure_key_file(path: &Path) -> BackupResult<()> {
    if !path.is_file() {
        return Err(BackupError::Connection(format!(
            "Private key not found: {}",
            path.display()
        )));
    }
    Ok(())
}
