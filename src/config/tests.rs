//! Tests for config functionality.

use crate::config::{LockConfig, LockStrategy};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = LockConfig::default();

    assert_eq!(config.timeout_ms, 10_000);
    assert_eq!(config.poll_interval_ms, 100);
    assert_eq!(config.stale_after_secs, 300);
    assert!(config.auto_release);
    assert_eq!(config.strategy, LockStrategy::File);

    assert_eq!(config.timeout(), Duration::from_secs(10));
    assert_eq!(config.poll_interval(), Duration::from_millis(100));
    assert_eq!(config.stale_after(), Duration::from_secs(300));
}

#[test]
fn test_parse_empty_mapping() {
    let config = LockConfig::from_yaml("{}\n").unwrap();
    assert_eq!(config, LockConfig::default());
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
timeout_ms: 5000
strategy: marker
"#;
    let config = LockConfig::from_yaml(yaml).unwrap();

    assert_eq!(config.timeout_ms, 5000);
    assert_eq!(config.strategy, LockStrategy::Marker);

    // Unspecified values keep their defaults
    assert_eq!(config.poll_interval_ms, 100);
    assert!(config.auto_release);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = r#"
poll_interval_ms: 25
lease_renewal: true
"#;
    let config = LockConfig::from_yaml(yaml).unwrap();
    assert_eq!(config.poll_interval_ms, 25);
}

#[test]
fn test_invalid_strategy_is_rejected() {
    let result = LockConfig::from_yaml("strategy: quorum\n");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("parse config YAML"));
}

#[test]
fn test_validation_rejects_zero_poll_interval() {
    let err = LockConfig::from_yaml("poll_interval_ms: 0\n").unwrap_err();
    assert!(err.to_string().contains("poll_interval_ms"));
}

#[test]
fn test_validation_rejects_zero_stale_threshold() {
    let err = LockConfig::from_yaml("stale_after_secs: 0\n").unwrap_err();
    assert!(err.to_string().contains("stale_after_secs"));
}

#[test]
fn test_zero_timeout_is_valid() {
    let config = LockConfig::from_yaml("timeout_ms: 0\n").unwrap();
    assert_eq!(config.timeout(), Duration::ZERO);
}

#[test]
fn test_yaml_roundtrip_preserves_values() {
    let config = LockConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_strategy(LockStrategy::Marker)
        .with_auto_release(false);

    let yaml = config.to_yaml().unwrap();
    assert!(yaml.contains("strategy: marker"));

    let parsed = LockConfig::from_yaml(&yaml).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_load_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("locks.yaml");
    std::fs::write(&path, "timeout_ms: 1500\nstale_after_secs: 60\n").unwrap();

    let config = LockConfig::load(&path).unwrap();
    assert_eq!(config.timeout(), Duration::from_millis(1500));
    assert_eq!(config.stale_after(), Duration::from_secs(60));
}

#[test]
fn test_load_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let err = LockConfig::load(temp_dir.path().join("absent.yaml")).unwrap_err();
    assert!(err.to_string().contains("read config file"));
}

#[test]
fn test_builders_override_fields() {
    let config = LockConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_stale_after(Duration::from_millis(1500));

    assert_eq!(config.poll_interval_ms, 20);
    // sub-second precision rounds up
    assert_eq!(config.stale_after_secs, 2);
}

#[test]
fn test_strategy_from_str() {
    assert_eq!(LockStrategy::from_str("file"), Some(LockStrategy::File));
    assert_eq!(LockStrategy::from_str("marker"), Some(LockStrategy::Marker));
    assert_eq!(LockStrategy::from_str("flock"), None);
    assert_eq!(LockStrategy::File.extension(), "lock");
    assert_eq!(LockStrategy::Marker.extension(), "lockdir");
}
