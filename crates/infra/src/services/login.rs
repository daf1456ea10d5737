//! Interactive login over a loopback redirect

use std::time::Duration;

use credbroker_common::error::CommonError;
use credbroker_core::{AuthError, AuthService, AuthorizationRequest};
use thiserror::Error;
use tracing::info;

use crate::integrations::oauth::OAuthCallbackServer;

/// Failure of an interactive login
#[derive(Debug, Error)]
pub enum LoginError {
    /// The redirect never arrived, or the listener failed
    #[error(transparent)]
    Callback(#[from] CommonError),

    /// The orchestrator rejected the callback or the exchange failed
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// A login waiting for the browser to come back
///
/// The listener is bound before the authorization URL is minted so the
/// redirect cannot race ahead of it.
pub struct LoopbackLogin {
    server: OAuthCallbackServer,
    request: AuthorizationRequest,
}

impl LoopbackLogin {
    /// Bind the configured redirect URI and mint an authorization URL
    ///
    /// # Errors
    /// - `LoginError::Callback` if the redirect URI is not a bindable
    ///   loopback address
    /// - `LoginError::Auth` if the authorization URL cannot be built
    pub async fn start(service: &AuthService) -> Result<Self, LoginError> {
        let server = OAuthCallbackServer::for_redirect_uri(&service.config().redirect_uri).await?;
        let request = service.generate_authorization_url().await?;
        Ok(Self { server, request })
    }

    /// URL to open in the user's browser
    #[must_use]
    pub fn authorization_url(&self) -> &str {
        &self.request.url
    }

    /// Wait for the redirect and complete the login through `service`
    ///
    /// # Errors
    /// - `LoginError::Callback` on timeout or a provider-side `error`
    /// - `LoginError::Auth` from `AuthService::handle_callback`
    pub async fn finish(mut self, service: &AuthService, timeout: Duration) -> Result<(), LoginError> {
        let params = self.server.wait_for_callback(timeout).await?;
        let result = service.handle_callback(&params.code, &params.state).await;
        self.server.shutdown().await?;
        result?;

        info!("Interactive login completed");
        Ok(())
    }
}
