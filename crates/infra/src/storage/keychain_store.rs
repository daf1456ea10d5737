//! Token set storage in the platform keychain

use std::sync::Arc;

use async_trait::async_trait;
use credbroker_common::security::{KeychainBackend, KeychainProvider};
use credbroker_common::time::{Clock, SystemClock};
use credbroker_core::{SecretStore, StorageError, TokenSet};
use tracing::{debug, warn};

const TOKEN_PREFIX: &str = "tokens.";

/// [`SecretStore`] keeping the token set as one JSON secret
///
/// The secret lives under `tokens.<account>` in the backend's service
/// namespace. Keychain calls are blocking and run on tokio's blocking pool.
pub struct KeychainSecretStore {
    keychain: Arc<dyn KeychainBackend>,
    key: String,
    clock: Arc<dyn Clock>,
}

impl KeychainSecretStore {
    /// Store backed by the platform keychain
    pub fn platform(service: impl Into<String>, account: &str) -> Self {
        Self::new(Arc::new(KeychainProvider::new(service)), account)
    }

    /// Store backed by any keychain implementation
    pub fn new(keychain: Arc<dyn KeychainBackend>, account: &str) -> Self {
        Self::with_clock(keychain, account, Arc::new(SystemClock))
    }

    /// Store reading time from `clock` for expiry checks
    pub fn with_clock(keychain: Arc<dyn KeychainBackend>, account: &str, clock: Arc<dyn Clock>) -> Self {
        Self { keychain, key: format!("{TOKEN_PREFIX}{account}"), clock }
    }

    /// Keychain key the token set is stored under
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeychainBackend, &str) -> Result<T, StorageError> + Send + 'static,
    {
        let keychain = Arc::clone(&self.keychain);
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || op(keychain.as_ref(), &key))
            .await
            .map_err(|e| StorageError::Backend(format!("keychain task failed: {e}")))?
    }
}

#[async_trait]
impl SecretStore for KeychainSecretStore {
    async fn store_tokens(&self, tokens: &TokenSet) -> Result<(), StorageError> {
        tokens.validate()?;
        let payload = serde_json::to_string(tokens)
            .map_err(|e| StorageError::Corrupt(format!("failed to encode token set: {e}")))?;

        self.run_blocking(move |keychain, key| {
            keychain.set_secret(key, &payload).map_err(StorageError::from)
        })
        .await?;

        debug!(key = %self.key, "Token set written to keychain");
        Ok(())
    }

    async fn get_tokens(&self) -> Result<TokenSet, StorageError> {
        let payload = self
            .run_blocking(|keychain, key| keychain.get_secret(key).map_err(StorageError::from))
            .await?;

        serde_json::from_str(&payload).map_err(|e| {
            warn!(key = %self.key, error = %e, "Stored token set does not decode");
            StorageError::Corrupt(e.to_string())
        })
    }

    async fn has_valid_tokens(&self) -> bool {
        match self.get_tokens().await {
            Ok(tokens) => !tokens.is_expired(self.clock.now()),
            Err(StorageError::NotFound) => false,
            Err(err) => {
                debug!(error = %err, "Keychain read failed; reporting no valid tokens");
                false
            }
        }
    }

    async fn clear_tokens(&self) -> Result<(), StorageError> {
        self.run_blocking(|keychain, key| keychain.delete_secret(key).map_err(StorageError::from))
            .await?;
        debug!(key = %self.key, "Token set removed from keychain");
        Ok(())
    }
}

impl std::fmt::Debug for KeychainSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeychainSecretStore")
            .field("service", &self.keychain.service_name())
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use credbroker_common::testing::MockKeychainProvider;
    use credbroker_common::time::MockClock;

    use super::*;

    fn store() -> (KeychainSecretStore, MockKeychainProvider, MockClock) {
        let keychain = MockKeychainProvider::new("credbroker-test");
        // Whole milliseconds: the stored expiry has millisecond precision.
        let clock = MockClock::at(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        let store =
            KeychainSecretStore::with_clock(Arc::new(keychain.clone()), "main", Arc::new(clock.clone()));
        (store, keychain, clock)
    }

    fn tokens(clock: &MockClock) -> TokenSet {
        TokenSet::new("access-1", "refresh-1", clock.now() + Duration::hours(1), "User.Read")
    }

    #[tokio::test]
    async fn test_store_and_get_round_trip() {
        let (store, keychain, clock) = store();
        let original = tokens(&clock);

        store.store_tokens(&original).await.unwrap();
        assert_eq!(store.get_tokens().await.unwrap(), original);
        assert!(keychain.raw("tokens.main").is_some());
        assert_eq!(keychain.write_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_store_is_not_found() {
        let (store, _, _) = store();
        assert_eq!(store.get_tokens().await.unwrap_err(), StorageError::NotFound);
        assert!(!store.has_valid_tokens().await);
    }

    #[tokio::test]
    async fn test_rejects_empty_tokens_without_writing() {
        let (store, keychain, clock) = store();
        let mut bad = tokens(&clock);
        bad.refresh_token.clear();

        assert!(matches!(
            store.store_tokens(&bad).await,
            Err(StorageError::InvalidTokenSet(_))
        ));
        assert_eq!(keychain.write_count(), 0);
    }

    #[tokio::test]
    async fn test_has_valid_tokens_tracks_expiry() {
        let (store, _, clock) = store();
        store.store_tokens(&tokens(&clock)).await.unwrap();
        assert!(store.has_valid_tokens().await);

        clock.advance(Duration::hours(1));
        assert!(!store.has_valid_tokens().await);
    }

    #[tokio::test]
    async fn test_update_access_token_preserves_refresh_and_scope() {
        let (store, _, clock) = store();
        store.store_tokens(&tokens(&clock)).await.unwrap();

        let new_expiry = clock.now() + Duration::hours(2);
        store.update_access_token("access-2", new_expiry).await.unwrap();

        let stored = store.get_tokens().await.unwrap();
        assert_eq!(stored.access_token, "access-2");
        assert_eq!(stored.expires_at, new_expiry);
        assert_eq!(stored.refresh_token, "refresh-1");
        assert_eq!(stored.scope, "User.Read");
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let (store, _, clock) = store();
        store.store_tokens(&tokens(&clock)).await.unwrap();

        store.clear_tokens().await.unwrap();
        store.clear_tokens().await.unwrap();
        assert_eq!(store.get_tokens().await.unwrap_err(), StorageError::NotFound);
    }

    #[tokio::test]
    async fn test_backend_failure_maps_to_backend_error() {
        let (store, keychain, clock) = store();
        store.store_tokens(&tokens(&clock)).await.unwrap();
        keychain.set_should_fail(true);

        assert!(matches!(store.get_tokens().await, Err(StorageError::Backend(_))));
        assert!(!store.has_valid_tokens().await);
        assert!(store.clear_tokens().await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_secret_is_reported() {
        let (store, keychain, _) = store();
        keychain.set_secret("tokens.main", "not json").unwrap();

        assert!(matches!(store.get_tokens().await, Err(StorageError::Corrupt(_))));
    }
}
