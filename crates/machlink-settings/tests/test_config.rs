use machlink_core::TransportKind;
use machlink_settings::{Config, SettingsError};
use tempfile::tempdir;

#[test]
fn test_save_and_load_toml() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");

    let mut config = Config::default();
    config.connection.transport = TransportKind::Telnet;
    config.detection.reset_on_connect = true;
    config.job.on_abort = Some("echo aborted".to_string());
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_save_and_load_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut config = Config::default();
    config.telemetry.pos_decimals = 4;
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded.telemetry.pos_decimals, 4);
}

#[test]
fn test_unknown_extension_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let err = Config::default().save_to_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::UnsupportedFormat(_)));
}

#[test]
fn test_load_or_create_writes_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let config = Config::load_or_create(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config, Config::default());
}

#[test]
fn test_invalid_file_fails_validation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[flow]\ntinyg_buffer_size = 0\n").unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(matches!(err, SettingsError::InvalidSetting { .. }));
}
