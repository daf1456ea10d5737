//! Mock implementations for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::security::{KeychainBackend, KeychainError};

/// In-memory keychain used in place of the platform keychain.
///
/// Clones share storage. `set_should_fail` makes every operation return
/// `KeychainError::AccessFailed`, mimicking a locked or unavailable keychain.
#[derive(Clone, Debug)]
pub struct MockKeychainProvider {
    service_name: String,
    storage: Arc<Mutex<HashMap<String, String>>>,
    should_fail: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MockKeychainProvider {
    /// Create a new mock keychain provider with a service name for namespacing.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            storage: Arc::new(Mutex::new(HashMap::new())),
            should_fail: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Force every subsequent operation to fail.
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    /// Number of successful `set_secret` calls.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw stored value, bypassing the failure toggle.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.storage.lock().get(key).cloned()
    }

    fn check(&self) -> Result<(), KeychainError> {
        if self.should_fail.load(Ordering::SeqCst) {
            Err(KeychainError::AccessFailed("mock keychain locked".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MockKeychainProvider {
    fn default() -> Self {
        Self::new("credbroker-test")
    }
}

impl KeychainBackend for MockKeychainProvider {
    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), KeychainError> {
        self.check()?;
        self.storage.lock().insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_secret(&self, key: &str) -> Result<String, KeychainError> {
        self.check()?;
        self.storage.lock().get(key).cloned().ok_or(KeychainError::NotFound)
    }

    fn delete_secret(&self, key: &str) -> Result<(), KeychainError> {
        self.check()?;
        self.storage.lock().remove(key);
        Ok(())
    }
}
