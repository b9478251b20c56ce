//! In-memory remote store for tests

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Write;
use std::rc::Rc;

use crate::config::settings::TransportConfig;
use crate::error::{BackupError, BackupResult};

use super::{RemoteConnector, RemoteStore};

#[derive(Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    fail_download_after: Option<usize>,
    fail_delete: bool,
    closed: bool,
    connections: usize,
}

/// Shared handle to a fake remote directory
#[derive(Clone, Default)]
pub(crate) struct FakeRemote {
    state: Rc<RefCell<RemoteState>>,
}

impl FakeRemote {
    pub(crate) fn with_files(files: &[(&str, &str)]) -> Self {
        let remote = Self::default();
        {
            let mut state = remote.state.borrow_mut();
            for (name, contents) in files {
                state.files.insert(name.to_string(), contents.as_bytes().to_vec());
            }
        }
        remote
    }

    /// Break the connection after `bytes` bytes of any download
    pub(crate) fn fail_download_after(&self, bytes: usize) {
        self.state.borrow_mut().fail_download_after = Some(bytes);
    }

    pub(crate) fn fail_delete(&self) {
        self.state.borrow_mut().fail_delete = true;
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.state.borrow().files.contains_key(name)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub(crate) fn connections(&self) -> usize {
        self.state.borrow().connections
    }
}

impl RemoteStore for FakeRemote {
    fn describe(&self) -> String {
        "in-memory remote".to_string()
    }

    fn list(&mut self) -> BackupResult<Vec<String>> {
        Ok(self.state.borrow().files.keys().cloned().collect())
    }

    fn download(&mut self, name: &str, out: &mut dyn Write) -> BackupResult<u64> {
        let state = self.state.borrow();
        let bytes = state
            .files
            .get(name)
            .ok_or_else(|| BackupError::Transfer(format!("{}: no such file", name)))?;

        match state.fail_download_after {
            Some(limit) => {
                out.write_all(&bytes[..limit.min(bytes.len())])?;
                Err(BackupError::Transfer("connection reset by peer".into()))
            }
            None => {
                out.write_all(bytes)?;
                Ok(bytes.len() as u64)
            }
        }
    }

    fn delete(&mut self, name: &str) -> BackupResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_delete {
            return Err(BackupError::Deletion(format!("550 {}: permission denied", name)));
        }
        state.files.remove(name);
        Ok(())
    }

    fn close(&mut self) -> BackupResult<()> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}

/// Hands out sessions on one [`FakeRemote`]
pub(crate) struct FakeConnector {
    remote: Option<FakeRemote>,
}

impl FakeConnector {
    pub(crate) fn new(remote: FakeRemote) -> Self {
        Self {
            remote: Some(remote),
        }
    }

    /// A connector whose every connection attempt fails
    pub(crate) fn refusing() -> Self {
        Self { remote: None }
    }
}

impl RemoteConnector for FakeConnector {
    fn connect(&self, _config: &TransportConfig) -> BackupResult<Box<dyn RemoteStore>> {
        match &self.remote {
            Some(remote) => {
                remote.state.borrow_mut().connections += 1;
                Ok(Box::new(remote.clone()))
            }
            None => Err(BackupError::Connection("530 Login incorrect".into())),
        }
    }
}
