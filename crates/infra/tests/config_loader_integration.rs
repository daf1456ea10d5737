//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading settings from files and turning
//! them into a core `AuthConfig`.

use std::io::Write;
use std::path::PathBuf;

use chrono::Duration;
use credbroker_infra::config::{self, StorageBackend};
use tempfile::NamedTempFile;

fn write_config(contents: &str, extension: &str) -> PathBuf {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");

    let path = temp_file.path().with_extension(extension);
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");
    path
}

#[test]
fn test_load_config_from_json_file() {
    let path = write_config(
        r#"{
            "provider": {
                "client_id": "integration-client",
                "client_secret": "integration-secret",
                "tenant": "contoso",
                "redirect_uri": "http://localhost:9100/callback"
            },
            "auth": {
                "state_timeout_minutes": 10,
                "refresh_buffer_ms": 120000,
                "sweep_interval_seconds": 30,
                "scopes": ["User.Read", "offline_access"]
            },
            "storage": {
                "backend": "file",
                "path": "/tmp/credbroker-integration/tokens.json"
            },
            "logging": { "level": "debug", "json": true }
        }"#,
        "json",
    );

    let settings = config::load_from_file(Some(path.clone())).expect("JSON settings");
    settings.validate().expect("valid settings");

    assert_eq!(settings.provider.client_id, "integration-client");
    assert_eq!(settings.provider.tenant, "contoso");
    assert_eq!(settings.storage.backend, StorageBackend::File);
    assert!(settings.logging.json);

    let auth = settings.auth_config();
    assert_eq!(auth.redirect_uri, "http://localhost:9100/callback");
    assert_eq!(auth.state_timeout, Duration::minutes(10));
    assert_eq!(auth.refresh_buffer, Duration::minutes(2));
    assert_eq!(auth.scope_string(), "User.Read offline_access");

    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_config_from_toml_file() {
    let path = write_config(
        r#"
[provider]
client_id = "toml-client"
client_secret = "toml-secret"
authority_host = "https://login.example.com"

[storage]
backend = "keychain"
keychain_service = "credbroker-integration"
keychain_account = "alice"
"#,
        "toml",
    );

    let settings = config::load_from_file(Some(path.clone())).expect("TOML settings");
    settings.validate().expect("valid settings");

    assert_eq!(settings.provider.authority_host, "https://login.example.com");
    assert_eq!(settings.storage.keychain_service, "credbroker-integration");
    assert_eq!(settings.storage.keychain_account, "alice");

    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_config_with_minimal_fields() {
    let path = write_config(
        r#"{ "provider": { "client_id": "minimal", "client_secret": "" } }"#,
        "json",
    );

    let settings = config::load_from_file(Some(path.clone())).expect("minimal settings");
    let auth = settings.auth_config();

    assert_eq!(settings.provider.tenant, "common");
    assert_eq!(settings.provider.redirect_uri, "http://localhost:8765/callback");
    assert_eq!(auth.state_timeout, Duration::minutes(5));
    assert_eq!(auth.refresh_buffer, Duration::minutes(5));
    assert_eq!(auth.scope_string(), "Tasks.Read User.Read offline_access");
    assert_eq!(settings.storage.backend, StorageBackend::Keychain);
    assert_eq!(settings.logging.level, "info");

    std::fs::remove_file(path).ok();
}

#[test]
fn test_file_backend_without_path_fails_validation() {
    let path = write_config(
        r#"
[provider]
client_id = "client"
client_secret = "secret"

[storage]
backend = "file"
"#,
        "toml",
    );

    let settings = config::load_from_file(Some(path.clone())).expect("parses");
    assert!(settings.validate().is_err());

    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_config_from_nonexistent_file() {
    let result = config::load_from_file(Some(PathBuf::from("/nonexistent/credbroker.toml")));
    assert!(result.is_err(), "Should fail when file doesn't exist");
}

#[test]
fn test_load_config_with_invalid_format() {
    let path = write_config("[provider\nclient_id = ", "toml");
    assert!(config::load_from_file(Some(path.clone())).is_err());
    std::fs::remove_file(path).ok();
}
