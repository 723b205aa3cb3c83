use courier_event_bus::{BusConfig, EventBus, EventBusError, HistoryConfig};
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
#[serial]
fn test_load_from_toml_file() -> Result<(), EventBusError> {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("bus.toml");
    fs::write(
        &path,
        "max_recursion_depth = 5\ndefault_timeout_ms = 250\n\n[history]\nmax_length = 20\n\n[leak_detection]\nthreshold = 4\n",
    )
    .expect("write config file");

    let config = BusConfig::load(&path)?;
    assert_eq!(config.max_recursion_depth, 5);
    assert_eq!(config.default_timeout(), Duration::from_millis(250));
    assert_eq!(config.history, Some(HistoryConfig { max_length: 20 }));

    let leaks = config.leak_detection.expect("leak detection section");
    assert_eq!(leaks.threshold, 4);
    assert!(leaks.show_subscription_details);

    let bus = EventBus::builder().config(config).build()?;
    assert!(bus.is_history_enabled());
    Ok(())
}

#[test]
#[serial]
fn test_missing_keys_fall_back_to_defaults() -> Result<(), EventBusError> {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("empty.toml");
    fs::write(&path, "").expect("write config file");

    let config = BusConfig::load(&path)?;
    assert_eq!(config, BusConfig::default());
    Ok(())
}

#[test]
#[serial]
fn test_missing_file_is_a_config_error() {
    let dir = tempdir().expect("temp dir");
    let err = BusConfig::load(dir.path().join("absent.toml")).unwrap_err();

    assert!(matches!(err, EventBusError::Config { .. }));
    assert!(err.to_string().starts_with("Config error (Failed to build config):"));
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("bad.toml");
    fs::write(&path, "max_recursion_depth = \"deep\"\n").expect("write config file");

    let err = BusConfig::load(&path).unwrap_err();
    assert!(err.to_string().starts_with("Config error (Failed to deserialize config):"));
}
