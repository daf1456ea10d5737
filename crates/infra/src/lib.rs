//! # credbroker infrastructure
//!
//! Concrete adapters for the ports defined in `credbroker-core`.
//!
//! This crate contains:
//! - Settings loading (environment, `.env`, TOML/JSON files)
//! - Secret stores (platform keychain, JSON file)
//! - The HTTP OAuth provider and the loopback redirect listener
//! - Tracing subscriber setup
//! - Service composition from settings
//!
//! ## Architecture
//! - Implements traits defined in `credbroker-core`
//! - Depends on `credbroker-common` and `credbroker-core`
//! - Contains all "impure" code (I/O, HTTP, keychain)

pub mod config;
pub mod integrations;
pub mod observability;
pub mod services;
pub mod storage;

// Re-export commonly used items
pub use config::Settings;
pub use integrations::oauth::{CallbackParams, HttpOAuthProvider, OAuthCallbackServer};
pub use observability::init_tracing;
pub use services::{build_auth_service, build_secret_store, LoginError, LoopbackLogin};
pub use storage::{FileSecretStore, KeychainSecretStore};
