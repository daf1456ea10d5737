//! Tracing subscriber setup
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies. The
//! output is compact text or JSON lines depending on settings.

use credbroker_common::error::{CommonError, CommonResult};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingSettings;

/// Install the global tracing subscriber
///
/// Returns `false` when a subscriber was already installed; the existing
/// one is kept.
///
/// # Errors
/// Returns `CommonError::Config` if the configured level is not a valid
/// filter directive
pub fn init_tracing(settings: &LoggingSettings) -> CommonResult<bool> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => level_filter(&settings.level)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if settings.json {
        registry.with(fmt::layer().json().with_current_span(false)).try_init().is_ok()
    } else {
        registry.with(fmt::layer().compact().with_target(true)).try_init().is_ok()
    };

    if installed {
        tracing::debug!(json = settings.json, "Tracing initialised");
    }
    Ok(installed)
}

fn level_filter(level: &str) -> CommonResult<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| CommonError::config_field("logging.level", format!("invalid filter: {e}")))
}
