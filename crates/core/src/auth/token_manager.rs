//! Access-token supply with single-flight refresh
//!
//! [`TokenManager::get_valid_access_token`] returns the stored access token
//! while its remaining lifetime exceeds the refresh buffer. Below the buffer
//! it refreshes, and concurrent callers share one upstream exchange:
//!
//! 1. Join an in-flight refresh if there is one
//! 2. Otherwise read the stored token set (fast path when still fresh)
//! 3. Under one lock, join the in-flight refresh or install a new one
//! 4. The refresh clears its slot when it settles
//!
//! A failed refresh clears the secret store before the error reaches any
//! waiter, so a poisoned refresh handle never lingers. A refresh that panics
//! is treated as failed; the slot is released either way.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use chrono::Duration;
use credbroker_common::time::{Clock, SystemClock};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::error::{AuthError, SESSION_EXPIRED};
use super::ports::{OAuthProvider, SecretStore};
use super::types::{AuthConfig, TokenSet, DEFAULT_TOKEN_LIFETIME_SECS};

type RefreshFuture = Shared<BoxFuture<'static, Result<String, AuthError>>>;
type RefreshSlot = Mutex<Option<RefreshFuture>>;

/// Refresh coordinator for the single stored token set
pub struct TokenManager {
    store: Arc<dyn SecretStore>,
    provider: Arc<dyn OAuthProvider>,
    scopes: Arc<[String]>,
    refresh_buffer: Duration,
    clock: Arc<dyn Clock>,
    in_flight: Arc<RefreshSlot>,
}

impl TokenManager {
    /// Create a token manager on the system clock
    pub fn new(
        store: Arc<dyn SecretStore>,
        provider: Arc<dyn OAuthProvider>,
        config: &AuthConfig,
    ) -> Self {
        Self::with_clock(store, provider, config, Arc::new(SystemClock))
    }

    /// Create a token manager reading time from `clock`
    pub fn with_clock(
        store: Arc<dyn SecretStore>,
        provider: Arc<dyn OAuthProvider>,
        config: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provider,
            scopes: config.scopes.clone().into(),
            refresh_buffer: config.refresh_buffer,
            clock,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Return an access token with more than the refresh buffer left
    ///
    /// # Errors
    /// - `AuthError::Storage` if the store cannot be read (including
    ///   `StorageError::NotFound` when not logged in) or the refreshed token
    ///   cannot be persisted
    /// - `AuthError::Authentication` if the refresh exchange failed; the
    ///   store has been cleared by the time this is returned
    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        let pending = self.in_flight.lock().clone();
        if let Some(refresh) = pending {
            debug!("Joining in-flight token refresh");
            return refresh.await;
        }

        let tokens = self.store.get_tokens().await?;
        let now = self.clock.now();
        if !tokens.needs_refresh(now, self.refresh_buffer) {
            debug!(
                remaining_secs = tokens.remaining_lifetime(now).num_seconds(),
                "Using cached access token"
            );
            return Ok(tokens.access_token);
        }

        self.join_or_start_refresh().await
    }

    /// Whether a refresh exchange is currently outstanding
    #[must_use]
    pub fn is_refresh_in_flight(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Remaining lifetime at or below which a token is refreshed
    #[must_use]
    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    /// Secret store backing this manager
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    fn join_or_start_refresh(&self) -> RefreshFuture {
        let mut slot = self.in_flight.lock();
        if let Some(existing) = slot.as_ref() {
            debug!("Joining in-flight token refresh");
            return existing.clone();
        }

        let refresh = RefreshTask {
            store: Arc::clone(&self.store),
            provider: Arc::clone(&self.provider),
            scopes: Arc::clone(&self.scopes),
            refresh_buffer: self.refresh_buffer,
            clock: Arc::clone(&self.clock),
        };
        let slot_ref = Arc::downgrade(&self.in_flight);

        let future = async move {
            let result = match AssertUnwindSafe(refresh.run()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    error!("Token refresh panicked");
                    Err(refresh.invalidate().await)
                }
            };
            release_slot(&slot_ref);
            result
        }
        .boxed()
        .shared();

        *slot = Some(future.clone());
        future
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("scopes", &self.scopes)
            .field("refresh_buffer", &self.refresh_buffer)
            .field("refresh_in_flight", &self.is_refresh_in_flight())
            .finish_non_exhaustive()
    }
}

fn release_slot(slot: &Weak<RefreshSlot>) {
    if let Some(slot) = slot.upgrade() {
        slot.lock().take();
    }
}

/// One refresh exchange, owned by the shared future
struct RefreshTask {
    store: Arc<dyn SecretStore>,
    provider: Arc<dyn OAuthProvider>,
    scopes: Arc<[String]>,
    refresh_buffer: Duration,
    clock: Arc<dyn Clock>,
}

impl RefreshTask {
    async fn run(&self) -> Result<String, AuthError> {
        // Re-read under the slot: a refresh that settled between our caller's
        // read and its slot check has already stored a fresh token.
        let current = self.store.get_tokens().await?;
        if !current.needs_refresh(self.clock.now(), self.refresh_buffer) {
            debug!("Token already refreshed by a previous exchange");
            return Ok(current.access_token);
        }

        info!("Refreshing access token");

        let exchange =
            match self.provider.exchange_refresh_handle(&current.refresh_token, &self.scopes).await
            {
                Ok(exchange) if !exchange.access_token.is_empty() => exchange,
                Ok(_) => {
                    warn!("Refresh response carried an empty access token");
                    return Err(self.invalidate().await);
                }
                Err(err) => {
                    warn!(error = %err, "Token refresh failed");
                    return Err(self.invalidate().await);
                }
            };

        let expires_at = exchange
            .expires_at
            .unwrap_or_else(|| self.clock.now() + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

        let rotated = exchange
            .refresh_handle
            .filter(|handle| !handle.is_empty() && *handle != current.refresh_token);

        match rotated {
            Some(refresh_token) => {
                debug!("Provider rotated the refresh handle");
                let tokens = TokenSet {
                    access_token: exchange.access_token.clone(),
                    refresh_token,
                    expires_at,
                    scope: current.scope,
                };
                self.store.store_tokens(&tokens).await?;
            }
            None => {
                self.store.update_access_token(&exchange.access_token, expires_at).await?;
            }
        }

        info!(%expires_at, "Access token refreshed");
        Ok(exchange.access_token)
    }

    async fn invalidate(&self) -> AuthError {
        if let Err(err) = self.store.clear_tokens().await {
            error!(error = %err, "Failed to clear token set after refresh failure");
        }
        AuthError::Authentication(SESSION_EXPIRED)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use credbroker_common::time::MockClock;

    use super::*;
    use crate::auth::error::StorageError;
    use crate::testing::{MockOAuthProvider, MockSecretStore};

    struct Harness {
        clock: MockClock,
        store: Arc<MockSecretStore>,
        provider: Arc<MockOAuthProvider>,
        manager: Arc<TokenManager>,
    }

    fn harness() -> Harness {
        let clock = MockClock::new();
        let store = Arc::new(MockSecretStore::with_clock(Arc::new(clock.clone())));
        let provider = Arc::new(MockOAuthProvider::new());
        let config = AuthConfig::new("http://localhost:8765/callback");
        let manager = Arc::new(TokenManager::with_clock(
            store.clone(),
            provider.clone(),
            &config,
            Arc::new(clock.clone()),
        ));
        Harness { clock, store, provider, manager }
    }

    fn seed(h: &Harness, expires_in: Duration) {
        h.store.seed(TokenSet::new(
            "cached-access",
            "refresh-handle",
            h.clock.now() + expires_in,
            "Tasks.Read User.Read offline_access",
        ));
    }

    #[tokio::test]
    async fn test_fresh_token_skips_refresh() {
        let h = harness();
        seed(&h, Duration::minutes(10));

        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "cached-access");
        assert_eq!(h.provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_token_inside_buffer_is_refreshed() {
        let h = harness();
        seed(&h, Duration::minutes(4));
        h.provider.set_refresh_token("new-access", Some(h.clock.now() + Duration::hours(1)));

        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "new-access");
        assert_eq!(h.provider.refresh_calls(), 1);
        assert_eq!(h.provider.last_refresh_handle().as_deref(), Some("refresh-handle"));

        let stored = h.store.snapshot().unwrap();
        assert_eq!(stored.access_token, "new-access");
        assert_eq!(stored.refresh_token, "refresh-handle");
        assert_eq!(stored.scope, "Tasks.Read User.Read offline_access");
        assert!(!h.manager.is_refresh_in_flight());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let h = harness();
        seed(&h, Duration::minutes(-30));
        h.provider.set_refresh_token("revived", None);

        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "revived");
        let stored = h.store.snapshot().unwrap();
        assert_eq!(stored.expires_at, h.clock.now() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_missing_tokens_propagate_not_found() {
        let h = harness();
        let err = h.manager.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, AuthError::Storage(StorageError::NotFound));
        assert_eq!(h.provider.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_store() {
        let h = harness();
        seed(&h, Duration::minutes(1));
        h.provider.set_refresh_failure(true);

        let err = h.manager.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, AuthError::Authentication(SESSION_EXPIRED));
        assert!(h.store.snapshot().is_none());
        assert!(!h.manager.is_refresh_in_flight());

        // Nothing left to refresh from.
        let err = h.manager.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, AuthError::Storage(StorageError::NotFound));
    }

    #[tokio::test]
    async fn test_empty_refreshed_token_fails_secure() {
        let h = harness();
        seed(&h, Duration::minutes(1));
        h.provider.set_refresh_token("", None);

        let err = h.manager.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, AuthError::Authentication(SESSION_EXPIRED));
        assert!(h.store.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_panicking_refresh_fails_secure_and_releases_slot() {
        let h = harness();
        seed(&h, Duration::minutes(1));
        h.provider.set_refresh_panic(true);

        let err = h.manager.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, AuthError::Authentication(SESSION_EXPIRED));
        assert!(h.store.snapshot().is_none());
        assert!(!h.manager.is_refresh_in_flight());

        // The coordinator keeps working after the panic.
        h.provider.set_refresh_panic(false);
        seed(&h, Duration::minutes(1));
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "refreshed-access");
    }

    #[tokio::test]
    async fn test_malformed_refresh_response_clears_store() {
        let h = harness();
        seed(&h, Duration::minutes(1));
        h.provider.set_refresh_malformed("expires_in out of range");

        let err = h.manager.get_valid_access_token().await.unwrap_err();
        assert_eq!(err, AuthError::Authentication(SESSION_EXPIRED));
        assert!(h.store.snapshot().is_none());
        assert!(!h.manager.is_refresh_in_flight());
    }

    #[tokio::test]
    async fn test_rotated_handle_is_persisted() {
        let h = harness();
        seed(&h, Duration::minutes(1));
        h.provider.set_refresh_response(crate::auth::types::RefreshExchange {
            access_token: "rotated-access".into(),
            expires_at: None,
            refresh_handle: Some("rotated-handle".into()),
        });

        h.manager.get_valid_access_token().await.unwrap();
        let stored = h.store.snapshot().unwrap();
        assert_eq!(stored.refresh_token, "rotated-handle");
        assert_eq!(stored.access_token, "rotated-access");
    }

    #[tokio::test]
    async fn test_persist_failure_surfaces_storage_error_without_clearing() {
        let h = harness();
        seed(&h, Duration::minutes(1));
        h.provider.set_refresh_token("new-access", None);
        h.store.fail_writes(true);

        let err = h.manager.get_valid_access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::Storage(StorageError::Backend(_))));
        assert_eq!(h.store.snapshot().unwrap().access_token, "cached-access");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let h = harness();
        seed(&h, Duration::minutes(2));
        h.provider.set_refresh_token("shared-access", None);
        h.provider.set_delay(std::time::Duration::from_millis(50));

        let calls = (0..16).map(|_| {
            let manager = Arc::clone(&h.manager);
            async move { manager.get_valid_access_token().await }
        });
        let results = futures::future::join_all(calls).await;

        assert_eq!(h.provider.refresh_calls(), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("shared-access")));
    }

    #[tokio::test]
    async fn test_slot_is_released_for_later_refreshes() {
        let h = harness();
        seed(&h, Duration::minutes(1));
        h.provider.set_refresh_token("first", Some(h.clock.now() + Duration::minutes(10)));
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "first");

        h.clock.advance(Duration::minutes(6));
        h.provider.set_refresh_token("second", Some(h.clock.now() + Duration::minutes(60)));
        assert_eq!(h.manager.get_valid_access_token().await.unwrap(), "second");
        assert_eq!(h.provider.refresh_calls(), 2);
        assert!(h.store.snapshot().is_some_and(|t| t.expires_at > Utc::now()));
    }
}
