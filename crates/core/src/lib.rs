//! # credbroker core
//!
//! Pure authorization logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - The CSRF state registry guarding the redirect handshake
//! - The single-flight token refresh coordinator
//! - The authorization flow orchestrator
//! - Port interfaces (traits) for secret stores and OAuth providers
//!
//! ## Architecture Principles
//! - Only depends on `credbroker-common`
//! - No HTTP, keychain or filesystem code
//! - All external dependencies via traits in [`auth::ports`]

pub mod auth;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use auth::ports::{OAuthProvider, SecretStore};
pub use auth::{
    AuthConfig, AuthError, AuthService, AuthorizationRequest, CodeExchange, ProviderError,
    RefreshExchange, StateRegistry, StorageError, TokenManager, TokenSet,
};
