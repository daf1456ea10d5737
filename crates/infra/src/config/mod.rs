//! Configuration loading and management
//!
//! Settings come from `CREDBROKER_*` environment variables (a `.env` file is
//! honoured) with a TOML/JSON file as fallback.

pub mod loader;
pub mod settings;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};
pub use settings::{
    AuthSettings, LoggingSettings, ProviderSettings, Settings, StorageBackend, StorageSettings,
};
