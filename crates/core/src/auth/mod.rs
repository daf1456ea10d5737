//! Authorization-code flow with CSRF state and coordinated token refresh
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   AuthService   │  URL generation + callback handling
//! └────────┬────────┘
//!          │
//!          ├──► StateRegistry      (one-time CSRF state tokens + sweep task)
//!          ├──► OAuthProvider      (port: authorize URL, code/refresh exchange)
//!          └──► TokenManager       (single-flight refresh, expiry buffer)
//!                    │
//!                    └──► SecretStore  (port: persisted TokenSet)
//! ```
//!
//! # Security Properties
//!
//! - **Single-use state**: a state token is removed on its first
//!   presentation, whether or not it was still valid.
//! - **Validate before exchange**: a callback with a bad state never reaches
//!   the provider.
//! - **Fail secure**: a failed refresh clears the stored token set before the
//!   error is returned.
//! - **Generic errors**: provider details are logged, never returned.

pub mod error;
pub mod ports;
pub mod service;
pub mod state;
pub mod token_manager;
pub mod types;

pub use error::{AuthError, ProviderError, StorageError};
pub use ports::{OAuthProvider, SecretStore};
pub use service::AuthService;
pub use state::StateRegistry;
pub use token_manager::TokenManager;
pub use types::{
    AuthConfig, AuthorizationRequest, CodeExchange, RefreshExchange, TokenSet, DEFAULT_SCOPES,
};
