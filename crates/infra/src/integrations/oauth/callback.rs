//! Loopback listener for the OAuth browser redirect
//!
//! The server only captures `code` and `state`; it does not judge the
//! state. Hand both to `AuthService::handle_callback`, which owns the
//! CSRF registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use credbroker_common::error::{CommonError, CommonResult};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

const DEFAULT_CALLBACK_PATH: &str = "/callback";

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Complete</title></head>
<body><h1>Authorization Received</h1><p>You can close this window.</p></body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body><h1>Authorization Failed</h1><p>The provider did not grant access.</p></body>
</html>"#;

const BAD_REQUEST_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Failed</title></head>
<body><h1>Authorization Failed</h1><p>Invalid or unexpected callback parameters.</p></body>
</html>"#;

const DUPLICATE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authorization Complete</title></head>
<body><h1>Already Handled</h1><p>This sign-in has already been processed.</p></body>
</html>"#;

/// `code` and `state` captured from the redirect
#[derive(Clone, PartialEq, Eq)]
pub struct CallbackParams {
    /// Authorization code
    pub code: String,
    /// State token echoed by the provider
    pub state: String,
}

impl std::fmt::Debug for CallbackParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackParams").field("code", &"[REDACTED]").finish_non_exhaustive()
    }
}

type CallbackOutcome = Result<CallbackParams, String>;
type OutcomeSender = Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>;

/// Single-use loopback HTTP server receiving the authorization redirect
pub struct OAuthCallbackServer {
    port: u16,
    path: String,
    receiver: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OAuthCallbackServer {
    /// Listen on `127.0.0.1:<port>` at `/callback`. Port 0 picks a free one.
    ///
    /// # Errors
    /// Returns `CommonError::Backend` if the port cannot be bound
    pub async fn start(port: u16) -> CommonResult<Self> {
        Self::bind(port, DEFAULT_CALLBACK_PATH.to_string()).await
    }

    /// Listen on the port and path of a loopback redirect URI
    ///
    /// # Errors
    /// Returns `CommonError::Config` if the URI is not an `http` loopback
    /// URI, `CommonError::Backend` if the port cannot be bound
    pub async fn for_redirect_uri(redirect_uri: &str) -> CommonResult<Self> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| CommonError::config_field("redirect_uri", format!("invalid URL: {e}")))?;

        let loopback = matches!(url.host_str(), Some("localhost" | "127.0.0.1"));
        if url.scheme() != "http" || !loopback {
            return Err(CommonError::config_field(
                "redirect_uri",
                "callback server needs an http://localhost redirect URI",
            ));
        }

        let port = url.port_or_known_default().unwrap_or(80);
        Self::bind(port, url.path().to_string()).await
    }

    async fn bind(port: u16, path: String) -> CommonResult<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|err| {
            CommonError::backend(
                "oauth-callback",
                format!("failed to bind loopback port {port}: {err}"),
                false,
            )
        })?;
        let port = listener
            .local_addr()
            .map_err(|err| {
                CommonError::backend("oauth-callback", format!("failed to read port: {err}"), false)
            })?
            .port();

        let (outcome_tx, receiver) = oneshot::channel();
        let sender: OutcomeSender = Arc::new(Mutex::new(Some(outcome_tx)));

        let app = Router::new().route(
            &path,
            get(move |query: Query<HashMap<String, String>>| {
                capture_redirect(query, Arc::clone(&sender))
            }),
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("OAuth callback server error: {}", err);
            }
        });

        info!(port, path = %path, "OAuth callback server listening");
        Ok(Self {
            port,
            path,
            receiver: Some(receiver),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Bound port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI matching this listener
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{}", self.port, self.path)
    }

    /// Wait for the browser redirect
    ///
    /// A timeout leaves the server listening, so the call can be repeated.
    ///
    /// # Errors
    /// - `CommonError::Timeout` if no redirect arrives in time
    /// - `CommonError::Backend` if the provider redirected with an `error`
    /// - `CommonError::Internal` if the callback was already taken or the
    ///   server stopped
    pub async fn wait_for_callback(&mut self, timeout: Duration) -> CommonResult<CallbackParams> {
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| CommonError::internal("OAuth callback already received"))?;

        let outcome = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => {
                self.receiver = None;
                return Err(CommonError::internal("OAuth callback server stopped"));
            }
            Err(_) => return Err(CommonError::timeout("oauth callback", timeout)),
        };
        self.receiver = None;

        outcome.map_err(|reason| CommonError::backend("oauth-provider", reason, false))
    }

    /// Stop the listener and wait for it to exit
    ///
    /// # Errors
    /// Returns `CommonError::Internal` if the server task panicked
    pub async fn shutdown(mut self) -> CommonResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    return Err(CommonError::internal(format!(
                        "OAuth callback server panicked: {err}"
                    )));
                }
            }
        }

        debug!(port = self.port, "OAuth callback server stopped");
        Ok(())
    }
}

impl Drop for OAuthCallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }
}

async fn capture_redirect(
    Query(params): Query<HashMap<String, String>>,
    sender: OutcomeSender,
) -> (StatusCode, Html<&'static str>) {
    let outcome = if let Some(error) = params.get("error") {
        let description = params.get("error_description").map_or("", String::as_str);
        warn!(error = %error, "Provider redirected with an error");
        Err(format!("{error}: {description}"))
    } else {
        match (params.get("code"), params.get("state")) {
            (Some(code), Some(state)) if !code.is_empty() => {
                Ok(CallbackParams { code: code.clone(), state: state.clone() })
            }
            _ => {
                debug!("Callback without code and state ignored");
                return (StatusCode::BAD_REQUEST, Html(BAD_REQUEST_PAGE));
            }
        }
    };

    let Some(tx) = sender.lock().take() else {
        return (StatusCode::CONFLICT, Html(DUPLICATE_PAGE));
    };

    let page = if outcome.is_ok() { SUCCESS_PAGE } else { FAILURE_PAGE };
    if tx.send(outcome).is_err() {
        debug!("Callback arrived after the waiter went away");
    }
    (StatusCode::OK, Html(page))
}
