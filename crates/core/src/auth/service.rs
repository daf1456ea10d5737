//! Authorization flow orchestrator
//!
//! Combines the state registry, the OAuth provider and the secret store
//! into URL generation and callback handling. Provider failures are logged
//! here and re-signalled as a generic [`AuthError::Authentication`].

use std::sync::Arc;

use chrono::Duration;
use credbroker_common::time::{Clock, SystemClock};
use tracing::{error, info, instrument, warn};

use super::error::{AuthError, AUTHENTICATION_FAILED, INVALID_STATE};
use super::ports::{OAuthProvider, SecretStore};
use super::state::StateRegistry;
use super::token_manager::TokenManager;
use super::types::{AuthConfig, AuthorizationRequest, TokenSet, DEFAULT_TOKEN_LIFETIME_SECS};

/// Authorization-code login and token access for one account
///
/// Collaborators are injected; construct one instance at startup and share
/// it. Tearing down means calling [`shutdown`](Self::shutdown) and dropping.
pub struct AuthService {
    config: AuthConfig,
    provider: Arc<dyn OAuthProvider>,
    store: Arc<dyn SecretStore>,
    states: StateRegistry,
    token_manager: TokenManager,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    /// Create a service on the system clock
    ///
    /// Call from within a tokio runtime to get the background state sweep.
    pub fn new(
        config: AuthConfig,
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn SecretStore>,
    ) -> Self {
        Self::with_clock(config, provider, store, Arc::new(SystemClock))
    }

    /// Create a service reading time from `clock`
    pub fn with_clock(
        config: AuthConfig,
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn SecretStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let states = StateRegistry::with_clock(
            config.state_timeout,
            config.sweep_interval,
            Arc::clone(&clock),
        );
        let token_manager = TokenManager::with_clock(
            Arc::clone(&store),
            Arc::clone(&provider),
            &config,
            Arc::clone(&clock),
        );

        Self { config, provider, store, states, token_manager, clock }
    }

    /// Mint a state token and build the provider authorization URL around it
    ///
    /// # Errors
    /// Returns `AuthError::Authentication` if the provider cannot build the URL
    #[instrument(skip(self))]
    pub async fn generate_authorization_url(&self) -> Result<AuthorizationRequest, AuthError> {
        let state = self.states.issue();

        let url = self
            .provider
            .build_authorization_url(&self.config.scopes, &self.config.redirect_uri, &state)
            .await
            .map_err(|err| {
                error!(error = %err, "Failed to build authorization URL");
                AuthError::Authentication(AUTHENTICATION_FAILED)
            })?;

        info!("Authorization URL generated");
        Ok(AuthorizationRequest { url, state })
    }

    /// Complete a login from the redirect's `code` and `state`
    ///
    /// The state is consumed before anything else happens, so a forged or
    /// replayed callback never reaches the provider.
    ///
    /// # Errors
    /// - `AuthError::Authorization` if the state is unknown, expired or used
    /// - `AuthError::Authentication` if the exchange fails or yields no
    ///   access token or refresh handle
    /// - `AuthError::Storage` if the token set cannot be persisted
    #[instrument(skip_all)]
    pub async fn handle_callback(&self, code: &str, state: &str) -> Result<(), AuthError> {
        if !self.states.validate_and_consume(state) {
            warn!("Callback rejected: invalid or expired state");
            return Err(AuthError::Authorization(INVALID_STATE));
        }

        let exchange = self
            .provider
            .exchange_authorization_code(code, &self.config.scopes, &self.config.redirect_uri)
            .await
            .map_err(|err| {
                error!(error = %err, "Authorization code exchange failed");
                AuthError::Authentication(AUTHENTICATION_FAILED)
            })?;

        if exchange.access_token.is_empty() {
            error!("Authorization code exchange returned an empty access token");
            return Err(AuthError::Authentication(AUTHENTICATION_FAILED));
        }

        let refresh_token = match self.provider.resolve_refresh_handle(&exchange).await {
            Ok(Some(handle)) if !handle.is_empty() => handle,
            Ok(_) => {
                error!("No refresh handle available for the new session");
                return Err(AuthError::Authentication(AUTHENTICATION_FAILED));
            }
            Err(err) => {
                error!(error = %err, "Failed to resolve refresh handle");
                return Err(AuthError::Authentication(AUTHENTICATION_FAILED));
            }
        };

        let expires_at = exchange
            .expires_at
            .unwrap_or_else(|| self.clock.now() + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));
        let scope = exchange.scopes.unwrap_or_else(|| self.config.scope_string());

        let tokens = TokenSet { access_token: exchange.access_token, refresh_token, expires_at, scope };
        self.store.store_tokens(&tokens).await?;

        info!(%expires_at, "Login completed; token set stored");
        Ok(())
    }

    /// Access token with more than the refresh buffer left
    ///
    /// # Errors
    /// See [`TokenManager::get_valid_access_token`]
    pub async fn get_valid_access_token(&self) -> Result<String, AuthError> {
        self.token_manager.get_valid_access_token().await
    }

    /// Whether a non-expired token set is stored
    pub async fn is_authenticated(&self) -> bool {
        self.store.has_valid_tokens().await
    }

    /// Forget the stored token set
    ///
    /// # Errors
    /// Returns `AuthError::Storage` if the store cannot be cleared
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.store.clear_tokens().await?;
        info!("Logged out; token set cleared");
        Ok(())
    }

    /// Logins started but not yet completed or expired
    #[must_use]
    pub fn pending_logins(&self) -> usize {
        self.states.count()
    }

    /// The refresh coordinator used by this service
    #[must_use]
    pub fn token_manager(&self) -> &TokenManager {
        &self.token_manager
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Stop the state registry's background sweep. Idempotent.
    pub fn shutdown(&self) {
        self.states.shutdown();
    }
}
