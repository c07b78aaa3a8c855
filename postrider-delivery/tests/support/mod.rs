//! Shared fixtures for delivery engine integration tests: a scriptable
//! mock relay plus recording implementations of the engine's collaborator
//! traits.

pub mod mock_relay;

use std::sync::Mutex;

use postrider_common::{
    CredentialKey,
    collab::{DeliveryLog, Notice, Notifier, PoolStore},
};

pub use mock_relay::{MockRelay, RelayCommand};

/// Captures every notice the engine emits.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

/// Captures every credential removal the engine requests.
#[derive(Debug, Default)]
pub struct RecordingStore {
    removed: Mutex<Vec<CredentialKey>>,
}

impl RecordingStore {
    pub fn removed(&self) -> Vec<CredentialKey> {
        self.removed.lock().unwrap().clone()
    }
}

impl PoolStore for RecordingStore {
    fn remove(&self, key: &CredentialKey) -> std::io::Result<()> {
        self.removed.lock().unwrap().push(key.clone());
        Ok(())
    }
}

/// Captures the engine's delivery transcript.
#[derive(Debug, Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<String>>,
}

impl RecordingLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl DeliveryLog for RecordingLog {
    fn record(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
