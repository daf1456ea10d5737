//! Port interfaces for the authorization flow
//!
//! These traits define the boundaries between core authorization logic
//! and infrastructure implementations (keychain, files, HTTP).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{ProviderError, StorageError};
use super::types::{CodeExchange, RefreshExchange, TokenSet};

/// Persistence for the single active token set
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Persist a token set, replacing any previous one
    ///
    /// # Errors
    /// Returns `StorageError::InvalidTokenSet` if either token is empty,
    /// or a backend error if the write fails
    async fn store_tokens(&self, tokens: &TokenSet) -> Result<(), StorageError>;

    /// Load the stored token set
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` when nothing is stored
    async fn get_tokens(&self) -> Result<TokenSet, StorageError>;

    /// A token set exists and its access token has not expired
    async fn has_valid_tokens(&self) -> bool;

    /// Remove the stored token set. Clearing an empty store succeeds.
    ///
    /// # Errors
    /// Returns a backend error if the delete fails
    async fn clear_tokens(&self) -> Result<(), StorageError>;

    /// Replace the access token and expiry, keeping refresh token and scope
    ///
    /// The default implementation is a read-modify-write through
    /// [`get_tokens`](Self::get_tokens) and [`store_tokens`](Self::store_tokens).
    ///
    /// # Errors
    /// Returns `StorageError::NotFound` if nothing is stored
    async fn update_access_token(
        &self,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut tokens = self.get_tokens().await?;
        tokens.access_token = access_token.to_string();
        tokens.expires_at = expires_at;
        self.store_tokens(&tokens).await
    }
}

/// Client for the upstream OAuth provider
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Build the authorization endpoint URL embedding `state`
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if the URL cannot be built
    async fn build_authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
    ) -> Result<String, ProviderError>;

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    /// Returns any `ProviderError` the exchange produced
    async fn exchange_authorization_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<CodeExchange, ProviderError>;

    /// Resolve the handle later passed to
    /// [`exchange_refresh_handle`](Self::exchange_refresh_handle)
    ///
    /// Providers that track sessions out of band (an account cache, for
    /// instance) override this. The default uses the refresh handle returned
    /// by the code exchange.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the session lookup fails
    async fn resolve_refresh_handle(
        &self,
        exchange: &CodeExchange,
    ) -> Result<Option<String>, ProviderError> {
        Ok(exchange.refresh_handle.clone())
    }

    /// Exchange a refresh handle for a new access token
    ///
    /// # Errors
    /// Returns any `ProviderError` the exchange produced
    async fn exchange_refresh_handle(
        &self,
        handle: &str,
        scopes: &[String],
    ) -> Result<RefreshExchange, ProviderError>;
}
