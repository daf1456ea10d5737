//! Token and configuration types for the authorization flow

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Read-only scopes requested on every authorization and refresh
pub const DEFAULT_SCOPES: [&str; 3] = ["Tasks.Read", "User.Read", "offline_access"];

/// Maximum age of a CSRF state token, in minutes
pub const DEFAULT_STATE_TIMEOUT_MINUTES: i64 = 5;

/// Remaining lifetime below which an access token is refreshed, in milliseconds
pub const DEFAULT_REFRESH_BUFFER_MS: i64 = 300_000;

/// Period of the background state sweep, in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Lifetime assumed when the provider omits an expiry, in seconds
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Persisted access/refresh token bundle
///
/// `expires_at` is always absolute and serializes as milliseconds since the
/// UNIX epoch. A set with an empty access token or refresh token is invalid;
/// stores reject it via [`TokenSet::validate`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// Opaque bearer token
    pub access_token: String,

    /// Opaque refresh handle handed back to the provider on refresh
    pub refresh_token: String,

    /// Absolute expiry of `access_token`
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,

    /// Granted scopes (space-separated)
    pub scope: String,
}

impl TokenSet {
    /// Create a token set
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
            scope: scope.into(),
        }
    }

    /// Reject token sets that must never be persisted
    ///
    /// # Errors
    /// Returns `StorageError::InvalidTokenSet` if either token is empty
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.access_token.is_empty() {
            return Err(StorageError::InvalidTokenSet("access token is empty"));
        }
        if self.refresh_token.is_empty() {
            return Err(StorageError::InvalidTokenSet("refresh token is empty"));
        }
        Ok(())
    }

    /// Time left before `expires_at`; negative once expired
    #[must_use]
    pub fn remaining_lifetime(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Whether the access token has passed its expiry
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the remaining lifetime has fallen to `buffer` or below
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        self.remaining_lifetime(now) <= buffer
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Authorization URL handed to the user agent, with the state it embeds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// Provider authorization endpoint URL
    pub url: String,
    /// CSRF state token embedded in `url`
    pub state: String,
}

/// Result of exchanging an authorization code
#[derive(Clone, Default)]
pub struct CodeExchange {
    /// Newly issued access token
    pub access_token: String,
    /// Absolute expiry, if the provider reported one
    pub expires_at: Option<DateTime<Utc>>,
    /// Granted scopes, if the provider reported them
    pub scopes: Option<String>,
    /// Refresh handle issued alongside the access token
    pub refresh_handle: Option<String>,
}

impl fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeExchange")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("refresh_handle", &self.refresh_handle.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Result of exchanging a refresh handle
#[derive(Clone, Default)]
pub struct RefreshExchange {
    /// Newly issued access token
    pub access_token: String,
    /// Absolute expiry, if the provider reported one
    pub expires_at: Option<DateTime<Utc>>,
    /// Replacement handle when the provider rotates it
    pub refresh_handle: Option<String>,
}

impl fmt::Debug for RefreshExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshExchange")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("refresh_handle", &self.refresh_handle.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Authorization flow configuration
///
/// Provider identity (client id, secret, tenant) lives with the provider
/// client; this carries only what the core protocol needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// Scopes requested on authorization and refresh
    pub scopes: Vec<String>,
    /// Maximum age of a CSRF state token
    pub state_timeout: Duration,
    /// Refresh when remaining lifetime is at or below this
    pub refresh_buffer: Duration,
    /// Background sweep period for expired state tokens
    pub sweep_interval: std::time::Duration,
}

impl AuthConfig {
    /// Configuration with default scopes and timings
    pub fn new(redirect_uri: impl Into<String>) -> Self {
        Self {
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
            state_timeout: Duration::minutes(DEFAULT_STATE_TIMEOUT_MINUTES),
            refresh_buffer: Duration::milliseconds(DEFAULT_REFRESH_BUFFER_MS),
            sweep_interval: std::time::Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }

    /// Override the state token timeout
    ///
    /// Values beyond the representable range saturate to `Duration::MAX`.
    #[must_use]
    pub fn with_state_timeout_minutes(mut self, minutes: i64) -> Self {
        self.state_timeout = Duration::try_minutes(minutes).unwrap_or(Duration::MAX);
        self
    }

    /// Override the refresh buffer
    #[must_use]
    pub fn with_refresh_buffer_ms(mut self, millis: i64) -> Self {
        self.refresh_buffer = Duration::milliseconds(millis);
        self
    }

    /// Override the background sweep period
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: std::time::Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Override the requested scopes
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Requested scopes as a space-delimited string
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample(expires_at: DateTime<Utc>) -> TokenSet {
        TokenSet::new("access-abc", "refresh-xyz", expires_at, "Tasks.Read User.Read")
    }

    #[test]
    fn test_validate_rejects_empty_tokens() {
        let now = Utc::now();
        assert!(sample(now).validate().is_ok());

        let mut missing_access = sample(now);
        missing_access.access_token.clear();
        assert_eq!(
            missing_access.validate(),
            Err(StorageError::InvalidTokenSet("access token is empty"))
        );

        let mut missing_refresh = sample(now);
        missing_refresh.refresh_token.clear();
        assert_eq!(
            missing_refresh.validate(),
            Err(StorageError::InvalidTokenSet("refresh token is empty"))
        );
    }

    #[test]
    fn test_needs_refresh_against_buffer() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let buffer = Duration::minutes(5);

        assert!(sample(now + Duration::minutes(4)).needs_refresh(now, buffer));
        assert!(!sample(now + Duration::minutes(10)).needs_refresh(now, buffer));
        assert!(sample(now - Duration::minutes(1)).needs_refresh(now, buffer));
        assert!(sample(now - Duration::minutes(1)).is_expired(now));
    }

    #[test]
    fn test_expires_at_serializes_as_epoch_millis() {
        let expires_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let json = serde_json::to_value(sample(expires_at)).unwrap();
        assert_eq!(json["expires_at"], serde_json::json!(1_704_067_200_000_i64));

        let back: TokenSet = serde_json::from_value(json).unwrap();
        assert_eq!(back.expires_at, expires_at);
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", sample(Utc::now()));
        assert!(!rendered.contains("access-abc"));
        assert!(!rendered.contains("refresh-xyz"));
        assert!(rendered.contains("[REDACTED]"));

        let exchange = CodeExchange {
            access_token: "secret-access".into(),
            refresh_handle: Some("secret-handle".into()),
            ..CodeExchange::default()
        };
        let rendered = format!("{exchange:?}");
        assert!(!rendered.contains("secret-access"));
        assert!(!rendered.contains("secret-handle"));
    }

    #[test]
    fn test_auth_config_defaults() {
        let config = AuthConfig::new("http://localhost:8765/callback");
        assert_eq!(config.scope_string(), "Tasks.Read User.Read offline_access");
        assert_eq!(config.state_timeout, Duration::minutes(5));
        assert_eq!(config.refresh_buffer, Duration::milliseconds(300_000));
        assert_eq!(config.sweep_interval, std::time::Duration::from_secs(60));

        let tuned = config.with_state_timeout_minutes(10).with_refresh_buffer_ms(1_000);
        assert_eq!(tuned.state_timeout, Duration::minutes(10));
        assert_eq!(tuned.refresh_buffer, Duration::seconds(1));
    }

    #[test]
    fn test_oversized_state_timeout_saturates() {
        let config =
            AuthConfig::new("http://localhost:8765/callback").with_state_timeout_minutes(i64::MAX);
        assert_eq!(config.state_timeout, Duration::MAX);
    }
}
