use quill::config::{LogLevel, QuillConfig};
use quill::error::{QuillError, EXIT_FATAL};
use quill::AnalysisService;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_partial_file_fills_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("quill.toml");
    std::fs::write(
        &path,
        r#"
[cache]
max_size = 42
ttl_secs = 10

[retry]
max_attempts = 5

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = QuillConfig::from_file(&path).unwrap();
    assert_eq!(config.cache.max_size, 42);
    assert!(config.cache.enabled);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay_secs, 2.0);
    assert_eq!(config.pool, QuillConfig::default().pool);
    assert_eq!(config.logging.level, LogLevel::Debug);

    let retry = config.retry.to_retry_config().unwrap();
    assert_eq!(retry.backoff.base_delay, Duration::from_secs(2));
    assert_eq!(retry.timeouts.timeout_for(3500, 1), Duration::from_secs(180));
}

#[test]
fn test_presets_survive_a_file_round_trip() {
    let dir = TempDir::new().unwrap();
    for preset in [
        QuillConfig::default(),
        QuillConfig::development_preset(),
        QuillConfig::production_preset(),
    ] {
        let path = dir.path().join("preset.toml");
        preset.to_file(&path).unwrap();
        assert_eq!(QuillConfig::from_file(&path).unwrap(), preset);
        assert!(preset.validate().is_ok());
    }
}

#[test]
fn test_malformed_file_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[cache\nmax_size = ").unwrap();

    let err = QuillConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, QuillError::Config(_)));
    assert_eq!(err.exit_code(), EXIT_FATAL);
}

#[test]
fn test_service_refuses_invalid_config() {
    let mut config = QuillConfig::development_preset();
    config.pool.size = 0;
    config.pool.max_overflow = 0;
    assert!(AnalysisService::builder(config).build().is_err());

    let mut config = QuillConfig::development_preset();
    config.retry.jitter = 1.5;
    assert!(AnalysisService::builder(config).build().is_err());
}
