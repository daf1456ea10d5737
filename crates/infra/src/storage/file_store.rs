//! Token set storage in a JSON file
//!
//! For hosts without a usable keychain (headless Linux, containers). The
//! file is replaced atomically via a sibling temp file and, on unix, is
//! readable by the owner only.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credbroker_common::time::{Clock, SystemClock};
use credbroker_core::{SecretStore, StorageError, TokenSet};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// [`SecretStore`] writing the token set to a single JSON file
pub struct FileSecretStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl FileSecretStore {
    /// Store at `path`. Nothing touches the disk until the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    /// Store reading time from `clock` for expiry checks
    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self { path: path.into(), clock, write_lock: Mutex::new(()) }
    }

    /// Location of the token file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_atomic(&self, payload: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = self.temp_path();
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(FILE_MODE);

        let mut file = options.open(&temp).await?;
        file.write_all(payload).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp, &self.path).await
    }

    /// Encode and write `tokens`; the caller holds `write_lock`
    async fn persist(&self, tokens: &TokenSet) -> Result<(), StorageError> {
        let payload = serde_json::to_vec_pretty(tokens)
            .map_err(|e| StorageError::Corrupt(format!("failed to encode token set: {e}")))?;
        self.write_atomic(&payload).await.map_err(|e| {
            StorageError::Backend(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn store_tokens(&self, tokens: &TokenSet) -> Result<(), StorageError> {
        tokens.validate()?;

        let _guard = self.write_lock.lock().await;
        self.persist(tokens).await?;

        debug!(path = %self.path.display(), "Token set written to file");
        Ok(())
    }

    // Read and write under one lock so a concurrent clear is never undone.
    async fn update_access_token(
        &self,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tokens = self.get_tokens().await?;
        tokens.access_token = access_token.to_string();
        tokens.expires_at = expires_at;
        tokens.validate()?;
        self.persist(&tokens).await?;

        debug!(path = %self.path.display(), "Access token updated in file");
        Ok(())
    }

    async fn get_tokens(&self) -> Result<TokenSet, StorageError> {
        let payload = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StorageError::NotFound),
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        serde_json::from_slice(&payload).map_err(|e| {
            warn!(path = %self.path.display(), error = %e, "Token file does not decode");
            StorageError::Corrupt(e.to_string())
        })
    }

    async fn has_valid_tokens(&self) -> bool {
        match self.get_tokens().await {
            Ok(tokens) => !tokens.is_expired(self.clock.now()),
            Err(StorageError::NotFound) => false,
            Err(err) => {
                debug!(error = %err, "Token file unreadable; reporting no valid tokens");
                false
            }
        }
    }

    async fn clear_tokens(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Token file removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Backend(format!(
                "failed to remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

impl std::fmt::Debug for FileSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSecretStore").field("path", &self.path).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use credbroker_common::time::MockClock;
    use tempfile::TempDir;

    use super::*;

    fn store(dir: &TempDir) -> (FileSecretStore, MockClock) {
        let clock = MockClock::at(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());
        let store = FileSecretStore::with_clock(
            dir.path().join("nested").join("tokens.json"),
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    fn tokens(clock: &MockClock) -> TokenSet {
        TokenSet::new("access-1", "refresh-1", clock.now() + Duration::hours(1), "User.Read")
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);

        assert_eq!(store.get_tokens().await.unwrap_err(), StorageError::NotFound);
        assert!(!store.has_valid_tokens().await);
        store.clear_tokens().await.unwrap();
    }

    #[tokio::test]
    async fn test_store_creates_parent_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store(&dir);
        let original = tokens(&clock);

        store.store_tokens(&original).await.unwrap();

        assert!(store.path().exists());
        assert!(!store.temp_path().exists());
        assert_eq!(store.get_tokens().await.unwrap(), original);
        assert!(store.has_valid_tokens().await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let (store, clock) = store(&dir);
        store.store_tokens(&tokens(&clock)).await.unwrap();

        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_update_and_clear() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store(&dir);
        store.store_tokens(&tokens(&clock)).await.unwrap();

        let new_expiry = clock.now() + Duration::minutes(90);
        store.update_access_token("access-2", new_expiry).await.unwrap();
        let stored = store.get_tokens().await.unwrap();
        assert_eq!(stored.access_token, "access-2");
        assert_eq!(stored.refresh_token, "refresh-1");
        assert_eq!(stored.expires_at, new_expiry);

        store.clear_tokens().await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_update_on_empty_store_is_not_found() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store(&dir);

        let err = store.update_access_token("access-2", clock.now()).await.unwrap_err();
        assert_eq!(err, StorageError::NotFound);
    }

    #[tokio::test]
    async fn test_update_waits_for_clear_and_does_not_resurrect() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store(&dir);
        store.store_tokens(&tokens(&clock)).await.unwrap();
        let store = Arc::new(store);

        // Hold the writer lock the way an in-progress clear would.
        let guard = store.write_lock.lock().await;
        let update = tokio::spawn({
            let store = Arc::clone(&store);
            let expiry = clock.now() + Duration::minutes(90);
            async move { store.update_access_token("access-2", expiry).await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!update.is_finished());

        std::fs::remove_file(store.path()).unwrap();
        drop(guard);

        assert_eq!(update.await.unwrap().unwrap_err(), StorageError::NotFound);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let (store, _) = store(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), b"{\"access_token\":").unwrap();

        assert!(matches!(store.get_tokens().await, Err(StorageError::Corrupt(_))));
        assert!(!store.has_valid_tokens().await);
    }

    #[tokio::test]
    async fn test_expired_tokens_are_not_valid() {
        let dir = TempDir::new().unwrap();
        let (store, clock) = store(&dir);
        store.store_tokens(&tokens(&clock)).await.unwrap();

        clock.advance(Duration::minutes(61));
        assert!(!store.has_valid_tokens().await);
        assert!(store.get_tokens().await.is_ok());
    }
}
