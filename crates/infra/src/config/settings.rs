//! Typed settings for the broker

use std::fmt;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use chrono::Duration;
use credbroker_common::error::{CommonError, CommonResult};
use credbroker_core::auth::types::{
    DEFAULT_REFRESH_BUFFER_MS, DEFAULT_SCOPES, DEFAULT_STATE_TIMEOUT_MINUTES,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use credbroker_core::AuthConfig;
use serde::{Deserialize, Serialize};
use url::Url;

/// Default identity platform host
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Default tenant segment
pub const DEFAULT_TENANT: &str = "common";

/// Default loopback redirect URI
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8765/callback";

/// Default keychain service name
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "credbroker";

/// Default keychain account holding the token set
pub const DEFAULT_KEYCHAIN_ACCOUNT: &str = "default";

/// Complete broker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// OAuth client identity and endpoints
    pub provider: ProviderSettings,
    /// Authorization flow timings and scopes
    #[serde(default)]
    pub auth: AuthSettings,
    /// Token set persistence
    #[serde(default)]
    pub storage: StorageSettings,
    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Settings with the given client credentials and defaults elsewhere
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            provider: ProviderSettings {
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                tenant: default_tenant(),
                authority_host: default_authority_host(),
                redirect_uri: default_redirect_uri(),
            },
            auth: AuthSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
        }
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    /// Returns `CommonError::Config` naming the offending field
    pub fn validate(&self) -> CommonResult<()> {
        if self.provider.client_id.trim().is_empty() {
            return Err(CommonError::config_field("provider.client_id", "must not be empty"));
        }
        if self.provider.tenant.trim().is_empty() {
            return Err(CommonError::config_field("provider.tenant", "must not be empty"));
        }
        Url::parse(&self.provider.authority_host).map_err(|e| {
            CommonError::config_field("provider.authority_host", format!("invalid URL: {e}"))
        })?;
        Url::parse(&self.provider.redirect_uri).map_err(|e| {
            CommonError::config_field("provider.redirect_uri", format!("invalid URL: {e}"))
        })?;
        if self.auth.state_timeout_minutes <= 0 {
            return Err(CommonError::config_field("auth.state_timeout_minutes", "must be positive"));
        }
        if Duration::try_minutes(self.auth.state_timeout_minutes).is_none() {
            return Err(CommonError::config_field("auth.state_timeout_minutes", "out of range"));
        }
        if self.auth.refresh_buffer_ms < 0 {
            return Err(CommonError::config_field("auth.refresh_buffer_ms", "must not be negative"));
        }
        if Duration::try_milliseconds(self.auth.refresh_buffer_ms).is_none() {
            return Err(CommonError::config_field("auth.refresh_buffer_ms", "out of range"));
        }
        if self.auth.scopes.is_empty() {
            return Err(CommonError::config_field("auth.scopes", "must not be empty"));
        }
        if self.storage.backend == StorageBackend::File && self.storage.path.is_none() {
            return Err(CommonError::config_field(
                "storage.path",
                "required when storage.backend is \"file\"",
            ));
        }
        Ok(())
    }

    /// Core authorization configuration derived from these settings
    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.provider.redirect_uri.clone())
            .with_scopes(self.auth.scopes.iter().cloned())
            .with_state_timeout_minutes(self.auth.state_timeout_minutes)
            .with_refresh_buffer_ms(self.auth.refresh_buffer_ms)
            .with_sweep_interval(StdDuration::from_secs(self.auth.sweep_interval_seconds))
    }
}

/// OAuth client registration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Application (client) id
    pub client_id: String,
    /// Confidential client secret
    pub client_secret: String,
    /// Tenant id or alias (`common`, `organizations`, a GUID)
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// Identity platform host
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// Redirect URI registered for the application
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("tenant", &self.tenant)
            .field("authority_host", &self.authority_host)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Authorization flow tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Maximum age of a CSRF state token
    pub state_timeout_minutes: i64,
    /// Refresh when remaining lifetime falls to this
    pub refresh_buffer_ms: i64,
    /// Background state sweep period
    pub sweep_interval_seconds: u64,
    /// Scopes requested on login and refresh
    pub scopes: Vec<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            state_timeout_minutes: DEFAULT_STATE_TIMEOUT_MINUTES,
            refresh_buffer_ms: DEFAULT_REFRESH_BUFFER_MS,
            sweep_interval_seconds: DEFAULT_SWEEP_INTERVAL_SECS,
            scopes: DEFAULT_SCOPES.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Where the token set is kept
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Platform keychain
    #[default]
    Keychain,
    /// JSON file on disk
    File,
}

impl std::str::FromStr for StorageBackend {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keychain" => Ok(Self::Keychain),
            "file" => Ok(Self::File),
            other => Err(CommonError::config_field(
                "storage.backend",
                format!("unknown backend '{other}' (expected \"keychain\" or \"file\")"),
            )),
        }
    }
}

/// Token set persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Backend kind
    pub backend: StorageBackend,
    /// File path for the file backend
    pub path: Option<PathBuf>,
    /// Keychain service name
    pub keychain_service: String,
    /// Keychain account the token set is stored under
    pub keychain_account: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Keychain,
            path: None,
            keychain_service: DEFAULT_KEYCHAIN_SERVICE.to_string(),
            keychain_account: DEFAULT_KEYCHAIN_ACCOUNT.to_string(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of compact text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}
