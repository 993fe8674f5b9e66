//! Integration tests for logging system
//!
//! The global subscriber can be installed once per process, so everything
//! that needs an initialised subscriber lives in a single test.

use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};

#[test]
fn test_init_logging_mirrors_events_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("backup.log");

    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Info)
        .with_spans(false)
        .with_log_file(&log_path);

    init_logging(config.clone()).unwrap();

    tracing::info!(site = "prod", transferred = 3, "Site backup completed");
    tracing::debug!("Filtered out below info");

    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("Site backup completed"));
    assert!(contents.contains("site=\"prod\""));
    assert!(contents.contains("transferred=3"));
    assert!(!contents.contains("Filtered out below info"));
    assert!(!contents.contains('\u{1b}'), "file output must not contain ANSI escapes");

    // A second initialisation is rejected
    assert!(init_logging(config).is_err());
}

#[test]
fn test_unwritable_log_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig::default().with_log_file(dir.path().join("missing").join("backup.log"));

    let err = init_logging(config).unwrap_err();
    assert!(err.to_string().contains("Failed to open log file"));
}

#[test]
fn test_log_level_parsing() {
    assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
    assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
    assert!("verbose".parse::<LogLevel>().is_err());
    assert!(LogLevel::Debug < LogLevel::Error);
}
