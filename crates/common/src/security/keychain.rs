//! Platform keychain provider for secret storage
//!
//! Thin wrapper over the OS credential store: macOS Keychain Access,
//! Windows Credential Manager and the Linux Secret Service API.
//!
//! ```no_run
//! # #[cfg(feature = "platform")]
//! # {
//! use credbroker_common::security::{KeychainBackend, KeychainProvider};
//!
//! let keychain = KeychainProvider::new("credbroker.tokens");
//! keychain.set_secret("default", "super-secret")?;
//! assert_eq!(keychain.get_secret("default")?, "super-secret");
//! # }
//! # Ok::<(), credbroker_common::security::KeychainError>(())
//! ```

use thiserror::Error;

/// Keyed secret storage
///
/// Implemented by [`KeychainProvider`] for the real platform keychain and by
/// `testing::MockKeychainProvider` for tests. Operations are synchronous;
/// async callers should hop onto a blocking thread.
pub trait KeychainBackend: Send + Sync {
    /// Service namespace entries are stored under
    fn service_name(&self) -> &str;

    /// Store (or overwrite) a secret
    ///
    /// # Errors
    /// Returns `KeychainError::AccessFailed` if the keychain rejects the write
    fn set_secret(&self, key: &str, value: &str) -> Result<(), KeychainError>;

    /// Retrieve a secret
    ///
    /// # Errors
    /// Returns `KeychainError::NotFound` if no entry exists,
    /// `KeychainError::AccessFailed` on any other keychain failure
    fn get_secret(&self, key: &str) -> Result<String, KeychainError>;

    /// Delete a secret. Deleting a missing entry succeeds.
    ///
    /// # Errors
    /// Returns `KeychainError::AccessFailed` if the keychain rejects the delete
    fn delete_secret(&self, key: &str) -> Result<(), KeychainError>;

    /// Whether an entry exists for `key`
    fn secret_exists(&self, key: &str) -> bool {
        self.get_secret(key).is_ok()
    }
}

/// Keychain error types
#[derive(Debug, Error)]
pub enum KeychainError {
    /// Keychain access failed (permission denied, not available, etc.)
    #[error("Keychain access failed: {0}")]
    AccessFailed(String),

    /// Entry not found in keychain
    #[error("Entry not found")]
    NotFound,

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "platform")]
pub use platform::KeychainProvider;

#[cfg(feature = "platform")]
mod platform {
    use keyring::Entry;
    use tracing::debug;

    use super::{KeychainBackend, KeychainError};

    /// Keychain provider bound to one service namespace
    #[derive(Debug, Clone)]
    pub struct KeychainProvider {
        service_name: String,
    }

    impl KeychainProvider {
        /// Create a provider for a service (e.g. `"credbroker.tokens"`)
        pub fn new(service_name: impl Into<String>) -> Self {
            Self { service_name: service_name.into() }
        }

        fn create_entry(&self, account: &str) -> Result<Entry, KeychainError> {
            Entry::new(&self.service_name, account).map_err(|e| {
                KeychainError::AccessFailed(format!("Failed to create keychain entry: {}", e))
            })
        }
    }

    impl KeychainBackend for KeychainProvider {
        fn service_name(&self) -> &str {
            &self.service_name
        }

        fn set_secret(&self, key: &str, value: &str) -> Result<(), KeychainError> {
            debug!(service = %self.service_name, key = %key, "Storing secret in keychain");

            let entry = self.create_entry(key)?;
            entry.set_password(value).map_err(|e| {
                KeychainError::AccessFailed(format!("Failed to store secret for {}: {}", key, e))
            })
        }

        fn get_secret(&self, key: &str) -> Result<String, KeychainError> {
            debug!(service = %self.service_name, key = %key, "Retrieving secret from keychain");

            let entry = self.create_entry(key)?;
            entry.get_password().map_err(|e| match e {
                keyring::Error::NoEntry => KeychainError::NotFound,
                other => KeychainError::AccessFailed(format!(
                    "Failed to retrieve secret for {}: {}",
                    key, other
                )),
            })
        }

        fn delete_secret(&self, key: &str) -> Result<(), KeychainError> {
            debug!(service = %self.service_name, key = %key, "Deleting secret from keychain");

            let entry = self.create_entry(key)?;
            match entry.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(KeychainError::AccessFailed(format!(
                    "Failed to delete secret for {}: {}",
                    key, e
                ))),
            }
        }
    }
}
