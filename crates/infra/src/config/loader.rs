//! Configuration loader
//!
//! Loads broker settings from environment variables or files.
//!
//! ## Loading Strategy
//! 1. A `.env` file in the working directory is applied to the environment
//! 2. If `CREDBROKER_CLIENT_ID` and `CREDBROKER_CLIENT_SECRET` are set, the
//!    settings are built from the environment alone
//! 3. Otherwise a config file is probed for
//! 4. JSON and TOML formats are supported
//!
//! ## Environment Variables
//! - `CREDBROKER_CLIENT_ID`: OAuth client id (required)
//! - `CREDBROKER_CLIENT_SECRET`: OAuth client secret (required)
//! - `CREDBROKER_TENANT`: Tenant segment of the authority URL
//! - `CREDBROKER_AUTHORITY_HOST`: Identity platform host
//! - `CREDBROKER_REDIRECT_URI`: Registered redirect URI
//! - `CREDBROKER_STATE_TIMEOUT_MINUTES`: CSRF state lifetime
//! - `CREDBROKER_REFRESH_BUFFER_MS`: Proactive refresh window
//! - `CREDBROKER_SWEEP_INTERVAL_SECONDS`: Background state sweep period
//! - `CREDBROKER_SCOPES`: Space-separated scopes
//! - `CREDBROKER_STORAGE_BACKEND`: `keychain` or `file`
//! - `CREDBROKER_STORAGE_PATH`: Token file path for the file backend
//! - `CREDBROKER_KEYCHAIN_SERVICE`: Keychain service name
//! - `CREDBROKER_KEYCHAIN_ACCOUNT`: Keychain account name
//! - `CREDBROKER_LOG_LEVEL`: Default log filter
//! - `CREDBROKER_LOG_JSON`: Emit JSON logs (true/false)
//!
//! ## File Locations
//! The loader probes `credbroker.{json,toml}` then `config.{json,toml}` in
//! the current directory, then next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use credbroker_common::error::{CommonError, CommonResult};

use super::settings::{Settings, StorageBackend};

/// Load settings with automatic fallback strategy
///
/// # Errors
/// Returns `CommonError::Config` if no source yields complete, valid settings
pub fn load() -> CommonResult<Settings> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Applied .env file");
    }

    let settings = match load_from_env() {
        Ok(settings) => {
            tracing::info!("Configuration loaded from environment variables");
            settings
        }
        Err(e) => {
            tracing::debug!(error = %e, "Failed to load from environment, trying file");
            load_from_file(None)?
        }
    };

    settings.validate()?;
    Ok(settings)
}

/// Load settings from `CREDBROKER_*` environment variables
///
/// Only the client id and secret are required; everything else falls back
/// to its default.
///
/// # Errors
/// Returns `CommonError::Config` if a required variable is missing or a
/// value does not parse
pub fn load_from_env() -> CommonResult<Settings> {
    let mut settings =
        Settings::new(env_var("CREDBROKER_CLIENT_ID")?, env_var("CREDBROKER_CLIENT_SECRET")?);

    if let Some(tenant) = env_opt("CREDBROKER_TENANT") {
        settings.provider.tenant = tenant;
    }
    if let Some(host) = env_opt("CREDBROKER_AUTHORITY_HOST") {
        settings.provider.authority_host = host;
    }
    if let Some(uri) = env_opt("CREDBROKER_REDIRECT_URI") {
        settings.provider.redirect_uri = uri;
    }

    if let Some(minutes) = env_parse::<i64>("CREDBROKER_STATE_TIMEOUT_MINUTES")? {
        settings.auth.state_timeout_minutes = minutes;
    }
    if let Some(millis) = env_parse::<i64>("CREDBROKER_REFRESH_BUFFER_MS")? {
        settings.auth.refresh_buffer_ms = millis;
    }
    if let Some(secs) = env_parse::<u64>("CREDBROKER_SWEEP_INTERVAL_SECONDS")? {
        settings.auth.sweep_interval_seconds = secs;
    }
    if let Some(scopes) = env_opt("CREDBROKER_SCOPES") {
        settings.auth.scopes = scopes.split_whitespace().map(str::to_string).collect();
    }

    if let Some(backend) = env_opt("CREDBROKER_STORAGE_BACKEND") {
        settings.storage.backend = StorageBackend::from_str(&backend)?;
    }
    if let Some(path) = env_opt("CREDBROKER_STORAGE_PATH") {
        settings.storage.path = Some(PathBuf::from(path));
    }
    if let Some(service) = env_opt("CREDBROKER_KEYCHAIN_SERVICE") {
        settings.storage.keychain_service = service;
    }
    if let Some(account) = env_opt("CREDBROKER_KEYCHAIN_ACCOUNT") {
        settings.storage.keychain_account = account;
    }

    if let Some(level) = env_opt("CREDBROKER_LOG_LEVEL") {
        settings.logging.level = level;
    }
    settings.logging.json = env_bool("CREDBROKER_LOG_JSON", settings.logging.json);

    Ok(settings)
}

/// Load settings from a file
///
/// If `path` is `None`, probes the standard locations. Format is detected
/// by file extension.
///
/// # Errors
/// Returns `CommonError::Config` if the file is missing or does not parse
pub fn load_from_file(path: Option<PathBuf>) -> CommonResult<Settings> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CommonError::config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CommonError::config("No config file found in any of the standard locations")
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CommonError::config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

fn parse_config(contents: &str, path: &Path) -> CommonResult<Settings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CommonError::config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CommonError::config(format!("Invalid JSON format: {e}"))),
        _ => Err(CommonError::config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a config file
///
/// Returns the first existing candidate, or `None`.
pub fn probe_config_paths() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["credbroker.json", "credbroker.toml", "config.json", "config.toml"];

    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) =
        std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        dirs.push(exe_dir);
    }

    dirs.iter()
        .flat_map(|dir| NAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.exists())
}

fn env_var(key: &str) -> CommonResult<String> {
    std::env::var(key).map_err(|_| {
        CommonError::config(format!("Missing required environment variable: {key}"))
    })
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T>(key: &str) -> CommonResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| CommonError::config_field(key, format!("invalid value '{raw}': {e}")))
        })
        .transpose()
}

/// Parse a boolean environment variable
///
/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive).
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const ALL_VARS: [&str; 15] = [
        "CREDBROKER_CLIENT_ID",
        "CREDBROKER_CLIENT_SECRET",
        "CREDBROKER_TENANT",
        "CREDBROKER_AUTHORITY_HOST",
        "CREDBROKER_REDIRECT_URI",
        "CREDBROKER_STATE_TIMEOUT_MINUTES",
        "CREDBROKER_REFRESH_BUFFER_MS",
        "CREDBROKER_SWEEP_INTERVAL_SECONDS",
        "CREDBROKER_SCOPES",
        "CREDBROKER_STORAGE_BACKEND",
        "CREDBROKER_STORAGE_PATH",
        "CREDBROKER_KEYCHAIN_SERVICE",
        "CREDBROKER_KEYCHAIN_ACCOUNT",
        "CREDBROKER_LOG_LEVEL",
        "CREDBROKER_LOG_JSON",
    ];

    fn clear_env() {
        for key in ALL_VARS {
            std::env::remove_var(key);
        }
    }

    fn temp_config(contents: &str, extension: &str) -> PathBuf {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        let path = temp_file.path().with_extension(extension);
        std::fs::copy(temp_file.path(), &path).unwrap();
        path
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for value in ["1", "true", "yes", "on", "TRUE"] {
            std::env::set_var("CREDBROKER_TEST_BOOL", value);
            assert!(env_bool("CREDBROKER_TEST_BOOL", false), "{value} should be true");
        }
        for value in ["0", "false", "no", "off"] {
            std::env::set_var("CREDBROKER_TEST_BOOL", value);
            assert!(!env_bool("CREDBROKER_TEST_BOOL", true), "{value} should be false");
        }

        std::env::remove_var("CREDBROKER_TEST_BOOL");
        assert!(env_bool("CREDBROKER_TEST_BOOL", true));
        assert!(!env_bool("CREDBROKER_TEST_BOOL", false));
    }

    #[test]
    fn test_load_from_env_all_vars_set() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("CREDBROKER_CLIENT_ID", "client-123");
        std::env::set_var("CREDBROKER_CLIENT_SECRET", "s3cret");
        std::env::set_var("CREDBROKER_TENANT", "contoso");
        std::env::set_var("CREDBROKER_REDIRECT_URI", "http://localhost:9000/callback");
        std::env::set_var("CREDBROKER_STATE_TIMEOUT_MINUTES", "10");
        std::env::set_var("CREDBROKER_REFRESH_BUFFER_MS", "60000");
        std::env::set_var("CREDBROKER_SCOPES", "User.Read offline_access");
        std::env::set_var("CREDBROKER_STORAGE_BACKEND", "file");
        std::env::set_var("CREDBROKER_STORAGE_PATH", "/tmp/credbroker/tokens.json");
        std::env::set_var("CREDBROKER_LOG_JSON", "true");

        let result = load_from_env();
        clear_env();

        let settings = result.expect("settings from env");
        assert_eq!(settings.provider.client_id, "client-123");
        assert_eq!(settings.provider.client_secret, "s3cret");
        assert_eq!(settings.provider.tenant, "contoso");
        assert_eq!(settings.provider.redirect_uri, "http://localhost:9000/callback");
        assert_eq!(settings.auth.state_timeout_minutes, 10);
        assert_eq!(settings.auth.refresh_buffer_ms, 60_000);
        assert_eq!(settings.auth.scopes, vec!["User.Read", "offline_access"]);
        assert_eq!(settings.storage.backend, StorageBackend::File);
        assert_eq!(settings.storage.path, Some(PathBuf::from("/tmp/credbroker/tokens.json")));
        assert!(settings.logging.json);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_env_missing_var() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();
        std::env::set_var("CREDBROKER_CLIENT_ID", "client-123");

        let result = load_from_env();
        clear_env();

        assert!(matches!(result, Err(CommonError::Config { .. })), "Should be a Config error");
    }

    #[test]
    fn test_load_from_env_invalid_number() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();
        std::env::set_var("CREDBROKER_CLIENT_ID", "client-123");
        std::env::set_var("CREDBROKER_CLIENT_SECRET", "s3cret");
        std::env::set_var("CREDBROKER_REFRESH_BUFFER_MS", "soon");

        let result = load_from_env();
        clear_env();

        assert!(matches!(
            result,
            Err(CommonError::Config { field: Some(ref f), .. }) if f == "CREDBROKER_REFRESH_BUFFER_MS"
        ));
    }

    #[test]
    fn test_load_from_file_json() {
        let path = temp_config(
            r#"{
                "provider": { "client_id": "json-client", "client_secret": "json-secret" },
                "auth": { "state_timeout_minutes": 3 }
            }"#,
            "json",
        );

        let settings = load_from_file(Some(path.clone())).expect("settings from JSON");
        assert_eq!(settings.provider.client_id, "json-client");
        assert_eq!(settings.provider.tenant, "common");
        assert_eq!(settings.auth.state_timeout_minutes, 3);
        assert_eq!(settings.auth.refresh_buffer_ms, 300_000);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_from_file_toml() {
        let path = temp_config(
            r#"
[provider]
client_id = "toml-client"
client_secret = "toml-secret"
tenant = "organizations"

[storage]
backend = "file"
path = "/var/lib/credbroker/tokens.json"

[logging]
level = "debug"
"#,
            "toml",
        );

        let settings = load_from_file(Some(path.clone())).expect("settings from TOML");
        assert_eq!(settings.provider.tenant, "organizations");
        assert_eq!(settings.storage.backend, StorageBackend::File);
        assert_eq!(settings.logging.level, "debug");
        assert!(!settings.logging.json);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_from_file_not_found() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/credbroker.json")));
        assert!(matches!(result, Err(CommonError::Config { .. })));
    }

    #[test]
    fn test_load_from_file_invalid_json() {
        let path = temp_config(r#"{ "provider": "#, "json");
        assert!(load_from_file(Some(path.clone())).is_err());
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_parse_config_requires_provider() {
        let result = parse_config(r#"{ "auth": {} }"#, Path::new("credbroker.json"));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("provider: {}", Path::new("credbroker.yaml"));
        assert!(result.is_err(), "Should fail with unsupported format");
    }
}
