//! OAuth 2.0 confidential client
//!
//! Implements the core [`OAuthProvider`] port over HTTP. The refresh token
//! issued by the code exchange is the refresh handle; a refresh response
//! that rotates it hands the new one back to the token manager.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use credbroker_common::time::{Clock, SystemClock};
use credbroker_core::{CodeExchange, OAuthProvider, ProviderError, RefreshExchange};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::ProviderSettings;

/// Request timeout for token endpoint calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Successful token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Error response (RFC 6749 §5.2)
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// HTTP client for the provider's authorize and token endpoints
pub struct HttpOAuthProvider {
    client: Client,
    client_id: String,
    client_secret: String,
    authorize_endpoint: Url,
    token_endpoint: Url,
    clock: Arc<dyn Clock>,
}

impl HttpOAuthProvider {
    /// Create a provider from settings with a 30 second request timeout
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if the endpoints cannot be formed or
    /// the HTTP client cannot be built
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Config(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(settings, client, Arc::new(SystemClock))
    }

    /// Create a provider around an existing HTTP client and clock
    ///
    /// # Errors
    /// Returns `ProviderError::Config` if the endpoints cannot be formed
    pub fn with_client(
        settings: &ProviderSettings,
        client: Client,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ProviderError> {
        if settings.client_id.is_empty() {
            return Err(ProviderError::Config("client id is empty".to_string()));
        }

        Ok(Self {
            client,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            authorize_endpoint: endpoint(settings, "authorize")?,
            token_endpoint: endpoint(settings, "token")?,
            clock,
        })
    }

    /// Authorization endpoint URL
    #[must_use]
    pub fn authorize_endpoint(&self) -> &Url {
        &self.authorize_endpoint
    }

    /// Token endpoint URL
    #[must_use]
    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, ProviderError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .client
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ProviderError::Request(e.to_string()))?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(err) => {
                    warn!(%status, error = %err.error, "Token endpoint rejected request");
                    ProviderError::Rejected { error: err.error, description: err.error_description }
                }
                Err(_) => ProviderError::MalformedResponse(format!(
                    "token endpoint returned HTTP {status} without an OAuth error body"
                )),
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ProviderError::MalformedResponse(format!("invalid token response: {e}")))
    }

    fn expiry(&self, expires_in: Option<i64>) -> Result<Option<DateTime<Utc>>, ProviderError> {
        let Some(secs) = expires_in else {
            return Ok(None);
        };
        if secs < 0 {
            return Err(ProviderError::MalformedResponse(format!("negative expires_in: {secs}")));
        }
        ChronoDuration::try_seconds(secs)
            .and_then(|lifetime| self.clock.now().checked_add_signed(lifetime))
            .map(Some)
            .ok_or_else(|| {
                ProviderError::MalformedResponse(format!("expires_in out of range: {secs}"))
            })
    }
}

#[async_trait]
impl OAuthProvider for HttpOAuthProvider {
    async fn build_authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
    ) -> Result<String, ProviderError> {
        let mut url = self.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state);
        Ok(url.into())
    }

    async fn exchange_authorization_code(
        &self,
        code: &str,
        scopes: &[String],
        redirect_uri: &str,
    ) -> Result<CodeExchange, ProviderError> {
        let scope = scopes.join(" ");
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
            ])
            .await?;

        debug!(has_refresh_token = response.refresh_token.is_some(), "Authorization code redeemed");
        Ok(CodeExchange {
            expires_at: self.expiry(response.expires_in)?,
            access_token: response.access_token,
            scopes: response.scope,
            refresh_handle: response.refresh_token,
        })
    }

    async fn exchange_refresh_handle(
        &self,
        handle: &str,
        scopes: &[String],
    ) -> Result<RefreshExchange, ProviderError> {
        let scope = scopes.join(" ");
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", handle),
                ("scope", scope.as_str()),
            ])
            .await?;

        let rotated = response.refresh_token.filter(|token| token != handle);
        debug!(rotated = rotated.is_some(), "Refresh token redeemed");
        Ok(RefreshExchange {
            expires_at: self.expiry(response.expires_in)?,
            access_token: response.access_token,
            refresh_handle: rotated,
        })
    }
}

impl fmt::Debug for HttpOAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpOAuthProvider")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

fn endpoint(settings: &ProviderSettings, leaf: &str) -> Result<Url, ProviderError> {
    let raw = format!(
        "{}/{}/oauth2/v2.0/{leaf}",
        settings.authority_host.trim_end_matches('/'),
        settings.tenant.trim_matches('/'),
    );
    Url::parse(&raw).map_err(|e| ProviderError::Config(format!("invalid {leaf} endpoint '{raw}': {e}")))
}
