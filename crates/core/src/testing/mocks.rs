//! Mock implementations of the authorization ports

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credbroker_common::time::{Clock, SystemClock};
use parking_lot::Mutex;

use crate::auth::error::{ProviderError, StorageError};
use crate::auth::ports::{OAuthProvider, SecretStore};
use crate::auth::types::{CodeExchange, RefreshExchange, TokenSet};

/// In-memory secret store with failure injection and call counters.
pub struct MockSecretStore {
    tokens: Mutex<Option<TokenSet>>,
    clock: Arc<dyn Clock>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    clears: AtomicUsize,
}

impl MockSecretStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store that judges expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: Mutex::new(None),
            clock,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            clears: AtomicUsize::new(0),
        }
    }

    /// Place a token set directly, bypassing validation and counters.
    pub fn seed(&self, tokens: TokenSet) {
        *self.tokens.lock() = Some(tokens);
    }

    /// Current contents, bypassing failure injection.
    #[must_use]
    pub fn snapshot(&self) -> Option<TokenSet> {
        self.tokens.lock().clone()
    }

    /// Make `get_tokens` fail with a backend error.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `store_tokens`, `update_access_token` and `clear_tokens` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get_tokens` calls.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful writes (full or partial).
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `clear_tokens` calls.
    #[must_use]
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn check_writes(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::Backend("mock write failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for MockSecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    async fn store_tokens(&self, tokens: &TokenSet) -> Result<(), StorageError> {
        self.check_writes()?;
        tokens.validate()?;
        *self.tokens.lock() = Some(tokens.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_tokens(&self) -> Result<TokenSet, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("mock read failure".to_string()));
        }
        self.tokens.lock().clone().ok_or(StorageError::NotFound)
    }

    async fn has_valid_tokens(&self) -> bool {
        self.tokens.lock().as_ref().is_some_and(|tokens| !tokens.is_expired(self.clock.now()))
    }

    async fn clear_tokens(&self) -> Result<(), StorageError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.check_writes()?;
        self.tokens.lock().take();
        Ok(())
    }

    async fn update_access_token(
        &self,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.check_writes()?;
        if access_token.is_empty() {
            return Err(StorageError::InvalidTokenSet("access token is empty"));
        }
        let mut guard = self.tokens.lock();
        let tokens = guard.as_mut().ok_or(StorageError::NotFound)?;
        tokens.access_token = access_token.to_string();
        tokens.expires_at = expires_at;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ProviderScript {
    code_exchange: CodeExchange,
    refresh_response: RefreshExchange,
    fail_authorization_url: bool,
    fail_code_exchange: bool,
    fail_refresh: bool,
    panic_on_refresh: bool,
    malformed_refresh: Option<String>,
    delay: Option<Duration>,
    last_authorization_request: Option<(Vec<String>, String)>,
    last_code: Option<String>,
    last_refresh_handle: Option<String>,
}

/// Scripted OAuth provider that never touches the network.
///
/// Defaults: code exchange yields `mock-access` / `mock-refresh`, refresh
/// yields `refreshed-access` with no expiry and no rotation.
pub struct MockOAuthProvider {
    script: Mutex<ProviderScript>,
    code_exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl MockOAuthProvider {
    /// Create a provider with the default script.
    pub fn new() -> Self {
        let script = ProviderScript {
            code_exchange: CodeExchange {
                access_token: "mock-access".to_string(),
                expires_at: None,
                scopes: None,
                refresh_handle: Some("mock-refresh".to_string()),
            },
            refresh_response: RefreshExchange {
                access_token: "refreshed-access".to_string(),
                expires_at: None,
                refresh_handle: None,
            },
            ..ProviderScript::default()
        };
        Self {
            script: Mutex::new(script),
            code_exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// Configure the code exchange response.
    pub fn set_code_exchange(&self, access_token: &str, refresh_handle: Option<&str>) {
        let mut script = self.script.lock();
        script.code_exchange.access_token = access_token.to_string();
        script.code_exchange.refresh_handle = refresh_handle.map(ToOwned::to_owned);
    }

    /// Replace the whole code exchange response.
    pub fn set_code_exchange_response(&self, exchange: CodeExchange) {
        self.script.lock().code_exchange = exchange;
    }

    /// Configure the refresh response (no rotation).
    pub fn set_refresh_token(&self, access_token: &str, expires_at: Option<DateTime<Utc>>) {
        self.set_refresh_response(RefreshExchange {
            access_token: access_token.to_string(),
            expires_at,
            refresh_handle: None,
        });
    }

    /// Replace the whole refresh response.
    pub fn set_refresh_response(&self, exchange: RefreshExchange) {
        self.script.lock().refresh_response = exchange;
    }

    /// Force `build_authorization_url` to fail.
    pub fn set_authorization_url_failure(&self, fail: bool) {
        self.script.lock().fail_authorization_url = fail;
    }

    /// Force the code exchange to fail.
    pub fn set_code_exchange_failure(&self, fail: bool) {
        self.script.lock().fail_code_exchange = fail;
    }

    /// Force the refresh exchange to be rejected.
    pub fn set_refresh_failure(&self, fail: bool) {
        self.script.lock().fail_refresh = fail;
    }

    /// Make the refresh exchange report a malformed provider response.
    pub fn set_refresh_malformed(&self, detail: &str) {
        self.script.lock().malformed_refresh = Some(detail.to_string());
    }

    /// Make the refresh exchange panic, as a buggy provider client would.
    pub fn set_refresh_panic(&self, panic: bool) {
        self.script.lock().panic_on_refresh = panic;
    }

    /// Delay every exchange, widening the window for concurrent callers.
    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }

    /// Number of code exchanges attempted.
    #[must_use]
    pub fn code_exchange_calls(&self) -> usize {
        self.code_exchange_calls.load(Ordering::SeqCst)
    }

    /// Number of refresh exchanges attempted.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    /// Scopes and redirect URI of the last authorization URL request.
    #[must_use]
    pub fn last_authorization_request(&self) -> Option<(Vec<String>, String)> {
        self.script.lock().last_authorization_request.clone()
    }

    /// Last authorization code exchanged.
    #[must_use]
    pub fn last_code(&self) -> Option<String> {
        self.script.lock().last_code.clone()
    }

    /// Last refresh handle presented.
    #[must_use]
    pub fn last_refresh_handle(&self) -> Option<String> {
        self.script.lock().last_refresh_handle.clone()
    }

    async fn pause(&self) {
        let delay = self.script.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockOAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OAuthProvider for MockOAuthProvider {
    async fn build_authorization_url(
        &self,
        scopes: &[String],
        redirect_uri: &str,
        state: &str,
    ) -> Result<String, ProviderError> {
        let mut script = self.script.lock();
        script.last_authorization_request = Some((scopes.to_vec(), redirect_uri.to_string()));
        if script.fail_authorization_url {
            return Err(ProviderError::Config("mock authorization URL failure".to_string()));
        }
        Ok(format!(
            "https://login.example.test/authorize?client_id=mock&scope={}&state={}",
            scopes.join("%20"),
            state
        ))
    }

    async fn exchange_authorization_code(
        &self,
        code: &str,
        _scopes: &[String],
        _redirect_uri: &str,
    ) -> Result<CodeExchange, ProviderError> {
        self.code_exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut script = self.script.lock();
        script.last_code = Some(code.to_string());
        if script.fail_code_exchange {
            return Err(ProviderError::Rejected {
                error: "invalid_grant".to_string(),
                description: Some("mock code rejected".to_string()),
            });
        }
        Ok(script.code_exchange.clone())
    }

    async fn exchange_refresh_handle(
        &self,
        handle: &str,
        _scopes: &[String],
    ) -> Result<RefreshExchange, ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut script = self.script.lock();
        script.last_refresh_handle = Some(handle.to_string());
        if script.panic_on_refresh {
            drop(script);
            panic!("mock refresh panicked");
        }
        if let Some(detail) = &script.malformed_refresh {
            return Err(ProviderError::MalformedResponse(detail.clone()));
        }
        if script.fail_refresh {
            return Err(ProviderError::Rejected {
                error: "invalid_grant".to_string(),
                description: Some("mock refresh rejected".to_string()),
            });
        }
        Ok(script.refresh_response.clone())
    }
}
