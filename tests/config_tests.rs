use ledger_sentinel::core::config::EngineConfig;
use ledger_sentinel::SentinelError;
use rust_decimal::Decimal;
use serial_test::serial;
use std::io::Write;
use test_case::test_case;

fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_toml_config() {
    let file = write_temp(
        ".toml",
        r#"
        [metrics]
        namespace = "chain"

        [scoring]
        history_retention_secs = 3600
        known_regions = ["US", "EU"]

        [scoring.weights]
        velocity = "0.30"
        pattern = "0.20"
        amount = "0.20"
        geography = "0.15"
        history = "0.15"

        [security]
        enable_compliance_check = false
        "#,
    );
    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.metrics.namespace, "chain");
    assert_eq!(config.scoring.history_retention_secs, 3600);
    assert_eq!(config.scoring.known_regions, vec!["US".to_string(), "EU".to_string()]);
    assert_eq!(config.scoring.weights.velocity, Decimal::new(30, 2));
    assert!(!config.security.enable_compliance_check);
    assert!(config.security.enable_fraud_detection);
}

#[test]
fn test_load_json_config() {
    let file = write_temp(".json", r#"{"security": {"alert_threshold": "60", "block_threshold": "85"}}"#);
    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.security.alert_threshold, Decimal::from(60));
    assert_eq!(config.security.block_threshold, Decimal::from(85));
    assert_eq!(config.scoring, EngineConfig::default().scoring);
}

#[test]
fn test_save_and_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sentinel.toml");
    let mut config = EngineConfig::default();
    config.scoring.max_known_locations = 4;
    config.save_to_file(&path).unwrap();
    assert_eq!(EngineConfig::from_file(&path).unwrap(), config);
}

#[test]
fn test_weights_not_summing_to_one_rejected() {
    let file = write_temp(
        ".toml",
        r#"
        [scoring.weights]
        velocity = "0.50"
        pattern = "0.20"
        amount = "0.25"
        geography = "0.15"
        history = "0.15"
        "#,
    );
    let err = EngineConfig::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("sum to 1"), "{}", err);
}

#[test]
fn test_thresholds_out_of_order_rejected() {
    let mut config = EngineConfig::default();
    config.security.alert_threshold = Decimal::from(95);
    assert!(matches!(config.validate(), Err(SentinelError::Configuration(_))));
}

#[test_case(0, 90 ; "alert below medium band")]
#[test_case(39, 90 ; "alert just below medium band")]
#[test_case(70, 101 ; "block above hundred")]
#[test_case(-5, 90 ; "negative alert")]
fn test_thresholds_out_of_band_rejected(alert: i64, block: i64) {
    let mut config = EngineConfig::default();
    config.security.alert_threshold = Decimal::from(alert);
    config.security.block_threshold = Decimal::from(block);
    let err = config.validate().unwrap_err();
    assert!(matches!(&err, SentinelError::Configuration(msg) if msg.contains("[40, 100]")), "{}", err);
}

#[test]
fn test_thresholds_at_band_edges_accepted() {
    let mut config = EngineConfig::default();
    config.security.alert_threshold = Decimal::from(40);
    config.security.block_threshold = Decimal::ONE_HUNDRED;
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(EngineConfig::from_file(dir.path().join("absent.toml")).is_err());
}

#[test]
#[serial]
fn test_env_overrides() {
    std::env::set_var("SENTINEL_METRICS_NAMESPACE", "override");
    std::env::set_var("SENTINEL_KNOWN_REGIONS", "US, SG,,JP");
    std::env::set_var("SENTINEL_ENABLE_VELOCITY_MONITORING", "false");

    let mut config = EngineConfig::default();
    let result = config.apply_env_overrides();

    std::env::remove_var("SENTINEL_METRICS_NAMESPACE");
    std::env::remove_var("SENTINEL_KNOWN_REGIONS");
    std::env::remove_var("SENTINEL_ENABLE_VELOCITY_MONITORING");

    result.unwrap();
    assert_eq!(config.metrics.namespace, "override");
    assert_eq!(config.scoring.known_regions, vec!["US", "SG", "JP"]);
    assert!(!config.security.enable_velocity_monitoring);
}

#[test]
#[serial]
fn test_env_override_invalid_value() {
    std::env::set_var("SENTINEL_PROFILE_ALPHA", "1.5");
    let mut config = EngineConfig::default();
    let result = config.apply_env_overrides();
    std::env::remove_var("SENTINEL_PROFILE_ALPHA");
    assert!(result.is_err());
}
