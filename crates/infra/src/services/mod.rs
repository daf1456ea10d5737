//! Service composition
//!
//! Wires settings into concrete stores and providers and hands back a
//! ready [`AuthService`].

pub mod login;

use std::sync::Arc;

use credbroker_common::error::{CommonError, CommonResult};
use credbroker_core::{AuthService, OAuthProvider, SecretStore};
use tracing::info;

pub use login::{LoginError, LoopbackLogin};

use crate::config::{Settings, StorageBackend};
use crate::integrations::oauth::HttpOAuthProvider;
use crate::storage::{FileSecretStore, KeychainSecretStore};

/// Secret store selected by `settings.storage`
///
/// # Errors
/// Returns `CommonError::Config` if the file backend has no path
pub fn build_secret_store(settings: &Settings) -> CommonResult<Arc<dyn SecretStore>> {
    let storage = &settings.storage;
    let store: Arc<dyn SecretStore> = match storage.backend {
        StorageBackend::Keychain => Arc::new(KeychainSecretStore::platform(
            storage.keychain_service.clone(),
            &storage.keychain_account,
        )),
        StorageBackend::File => {
            let path = storage.path.clone().ok_or_else(|| {
                CommonError::config_field("storage.path", "required for the file backend")
            })?;
            Arc::new(FileSecretStore::new(path))
        }
    };
    Ok(store)
}

/// Validate settings and build the HTTP provider, store and service
///
/// Call from within a tokio runtime so the state registry gets its
/// background sweep.
///
/// # Errors
/// Returns `CommonError::Config` for invalid settings or provider
/// endpoints
pub fn build_auth_service(settings: &Settings) -> CommonResult<AuthService> {
    settings.validate()?;

    let provider: Arc<dyn OAuthProvider> = Arc::new(
        HttpOAuthProvider::new(&settings.provider)
            .map_err(|e| CommonError::config_field("provider", e.to_string()))?,
    );
    let store = build_secret_store(settings)?;

    info!(
        tenant = %settings.provider.tenant,
        backend = ?settings.storage.backend,
        "Auth service configured"
    );
    Ok(AuthService::new(settings.auth_config(), provider, store))
}
