//! Error types for the authorization flow
//!
//! Callers only ever see [`AuthError`] with a fixed, non-sensitive message.
//! [`ProviderError`] carries the upstream detail and is logged at the point
//! of failure, then stripped before it crosses the orchestrator boundary.

use credbroker_common::error::{ErrorClassification, ErrorSeverity};
use credbroker_common::security::KeychainError;
use thiserror::Error;

/// Message for a missing, forged, expired or replayed state token
pub const INVALID_STATE: &str = "invalid or expired state";

/// Message for a failed authorization-code exchange
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

/// Message for a failed refresh exchange
pub const SESSION_EXPIRED: &str = "session expired, please re-authenticate";

/// Errors surfaced by `AuthService` and `TokenManager`
///
/// `Clone` so one refresh outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The CSRF state contract was violated. Never retried automatically.
    #[error("authorization failed: {0}")]
    Authorization(&'static str),

    /// The upstream exchange or refresh failed
    #[error("{0}")]
    Authentication(&'static str),

    /// Secret store failure; treat as "not authenticated"
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Whether the caller should restart the login flow
    #[must_use]
    pub fn requires_login(&self) -> bool {
        match self {
            Self::Authorization(_) | Self::Authentication(_) => true,
            Self::Storage(storage) => storage.is_not_found(),
        }
    }
}

impl ErrorClassification for AuthError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Authorization(_) | Self::Authentication(_) => false,
            Self::Storage(storage) => storage.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Authorization(_) | Self::Authentication(_) => ErrorSeverity::Warning,
            Self::Storage(storage) => storage.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Secret store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No token set is stored
    #[error("no token set stored")]
    NotFound,

    /// Token set rejected before persisting
    #[error("invalid token set: {0}")]
    InvalidTokenSet(&'static str),

    /// Backend unavailable or rejected the operation
    #[error("secret store backend error: {0}")]
    Backend(String),

    /// Stored record could not be decoded
    #[error("stored token set is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Whether this is the empty-store case
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl ErrorClassification for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound => ErrorSeverity::Info,
            Self::InvalidTokenSet(_) => ErrorSeverity::Warning,
            Self::Backend(_) | Self::Corrupt(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }
}

impl From<KeychainError> for StorageError {
    fn from(err: KeychainError) -> Self {
        match err {
            KeychainError::NotFound => Self::NotFound,
            KeychainError::AccessFailed(msg) => Self::Backend(msg),
            KeychainError::Serialization(e) => Self::Corrupt(e.to_string()),
        }
    }
}

/// OAuth provider failures, logged but never returned to callers
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure (connect, timeout, TLS)
    #[error("request to OAuth provider failed: {0}")]
    Request(String),

    /// Provider answered with an OAuth error response
    #[error("OAuth provider rejected the request: {error}")]
    Rejected {
        /// RFC 6749 `error` code
        error: String,
        /// `error_description`, if any
        description: Option<String>,
    },

    /// Provider answered with something that is not a token response
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Provider client is misconfigured
    #[error("OAuth provider misconfigured: {0}")]
    Config(String),
}

impl ErrorClassification for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Request(_) | Self::Rejected { .. } => ErrorSeverity::Warning,
            Self::MalformedResponse(_) => ErrorSeverity::Error,
            Self::Config(_) => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
