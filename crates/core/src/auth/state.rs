//! CSRF state registry for the redirect-based login handshake
//!
//! Every authorization URL embeds a state token minted here. The callback
//! must present it back exactly once within the timeout:
//! - tokens are 256 bits of OS randomness, hex encoded (64 chars)
//! - a token is removed on its first presentation, valid or not
//! - expired tokens are swept by `issue()` and by a background task
//!
//! The map lives behind a synchronous mutex that is never held across an
//! await, so `issue` and `validate_and_consume` are atomic with respect to
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use credbroker_common::time::{Clock, SystemClock};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Entropy of a state token in bytes
const STATE_TOKEN_BYTES: usize = 32;

type StateMap = HashMap<String, StateEntry>;

#[derive(Debug, Clone, Copy)]
struct StateEntry {
    timestamp: DateTime<Utc>,
}

/// Registry of outstanding one-time state tokens
///
/// Owns a background sweep task when constructed inside a tokio runtime.
/// The task holds only a weak reference to the map and is cancelled by
/// [`shutdown`](Self::shutdown) or on drop.
pub struct StateRegistry {
    entries: Arc<Mutex<StateMap>>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
    sweep_task: Option<JoinHandle<()>>,
}

impl StateRegistry {
    /// Create a registry on the system clock
    ///
    /// # Arguments
    /// * `timeout` - maximum age at which a state token is still valid
    /// * `sweep_interval` - period of the background sweep
    pub fn new(timeout: Duration, sweep_interval: StdDuration) -> Self {
        Self::with_clock(timeout, sweep_interval, Arc::new(SystemClock))
    }

    /// Create a registry reading time from `clock`
    pub fn with_clock(timeout: Duration, sweep_interval: StdDuration, clock: Arc<dyn Clock>) -> Self {
        let entries = Arc::new(Mutex::new(StateMap::new()));
        let cancellation_token = CancellationToken::new();

        let sweep_task = spawn_sweeper(
            Arc::downgrade(&entries),
            Arc::clone(&clock),
            timeout,
            sweep_interval,
            cancellation_token.clone(),
        );

        Self { entries, timeout, clock, cancellation_token, sweep_task }
    }

    /// Mint and record a new state token
    ///
    /// Expired entries are swept first.
    pub fn issue(&self) -> String {
        let token = generate_state_token();
        let now = self.clock.now();

        let swept = {
            let mut entries = self.entries.lock();
            let swept = remove_expired(&mut entries, now, self.timeout);
            entries.insert(token.clone(), StateEntry { timestamp: now });
            swept
        };

        debug!(swept, "Issued authorization state");
        token
    }

    /// Consume a state token, reporting whether it was still valid
    ///
    /// Unknown tokens return `false`. Known tokens are removed before the
    /// age check, so a token is accepted at most once.
    pub fn validate_and_consume(&self, state: &str) -> bool {
        let Some(entry) = self.entries.lock().remove(state) else {
            debug!("Rejected unknown authorization state");
            return false;
        };

        let valid = self.clock.now() - entry.timestamp < self.timeout;
        if !valid {
            debug!("Rejected expired authorization state");
        }
        valid
    }

    /// Remove every entry older than the timeout, returning how many went
    pub fn sweep_expired(&self) -> usize {
        remove_expired(&mut self.entries.lock(), self.clock.now(), self.timeout)
    }

    /// Number of outstanding (not yet consumed or swept) tokens
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Configured token timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the background sweep task is still running
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.sweep_task.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background sweep. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.cancellation_token.is_cancelled() {
            debug!("Stopping authorization state sweep");
            self.cancellation_token.cancel();
        }
    }
}

impl Drop for StateRegistry {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

impl std::fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRegistry")
            .field("outstanding", &self.count())
            .field("timeout", &self.timeout)
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn generate_state_token() -> String {
    let mut bytes = [0u8; STATE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn remove_expired(entries: &mut StateMap, now: DateTime<Utc>, timeout: Duration) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| now - entry.timestamp <= timeout);
    before - entries.len()
}

fn spawn_sweeper(
    entries: Weak<Mutex<StateMap>>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    interval: StdDuration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        warn!("State sweep interval is zero; background sweep disabled");
        return None;
    }

    let Ok(runtime) = Handle::try_current() else {
        debug!("No tokio runtime; state entries are swept on issue only");
        return None;
    };

    Some(runtime.spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("State sweep cancelled");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    let Some(entries) = entries.upgrade() else {
                        break;
                    };
                    let swept = remove_expired(&mut entries.lock(), clock.now(), timeout);
                    if swept > 0 {
                        debug!(swept, "Background sweep removed expired authorization states");
                    }
                }
            }
        }
    }))
}
