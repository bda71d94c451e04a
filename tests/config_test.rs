//! Integration tests for configuration loading

use parking_control::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[facility]
level_capacity = 10

[gate]
raise_ms = 1
hold_ms = 2
lower_ms = 3

[billing]
rate_per_ms = 0.1
ledger_file = "/tmp/test-billing.txt"
workers = 3

[whitelist]
file = "test-plates.txt"

[fire]
sample_period_ms = 5
fixed_threshold = 60
fixed_threshold_ratio = 0.8
rate_of_rise = 10

[evacuation]
message = "GET OUT "
interval_ms = 50

[rendezvous]
timeout_ms = 250

[metrics]
interval_secs = 15

[status]
file = "/tmp/test-status.jsonl"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.level_capacity(), 10);
    assert_eq!(config.raise_duration(), Duration::from_millis(1));
    assert_eq!(config.hold_duration(), Duration::from_millis(2));
    assert_eq!(config.lower_duration(), Duration::from_millis(3));
    assert_eq!(config.rate_per_ms(), 0.1);
    assert_eq!(config.ledger_file(), "/tmp/test-billing.txt");
    assert_eq!(config.billing_workers(), 3);
    assert_eq!(config.whitelist_file(), "test-plates.txt");
    assert_eq!(config.fire_sample_period(), Duration::from_millis(5));
    assert_eq!(config.fire_fixed_threshold(), 60);
    assert_eq!(config.fire_fixed_threshold_ratio(), 0.8);
    assert_eq!(config.fire_rate_of_rise(), 10);
    assert_eq!(config.evacuation_message(), "GET OUT ");
    assert_eq!(config.evacuation_interval(), Duration::from_millis(50));
    assert_eq!(config.rendezvous_timeout(), Duration::from_millis(250));
    assert_eq!(config.metrics_interval_secs(), 15);
    assert_eq!(config.status_file(), "/tmp/test-status.jsonl");
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.level_capacity(), 20);
    assert_eq!(config.raise_duration(), Duration::from_millis(10));
    assert_eq!(config.rate_per_ms(), 0.05);
    assert_eq!(config.evacuation_message(), "EVACUATE ");
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[gate\nraise_ms = ").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_shipped_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/parking.toml");
    let config = Config::from_file(path).unwrap();
    assert_eq!(config.level_capacity(), 20);
    assert_eq!(config.fire_fixed_threshold(), 58);
}
