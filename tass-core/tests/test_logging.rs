//! Integration test for installing the global logger from configuration.
//!
//! Kept in its own test binary: the global subscriber can be set once per process.

use tass_core::config::LoggingConfig;
use tass_core::error::TassError;
use tass_core::logging::init_from_config;
use tempfile::TempDir;

#[test]
fn init_from_config_writes_to_configured_directory() {
    let dir = TempDir::new().unwrap();
    let log_dir = dir.path().join("tass").join("logs");
    let config = LoggingConfig {
        level: "tass_core=debug,test_logging=debug".into(),
        directory: log_dir.to_string_lossy().into_owned(),
        json_output: false,
    };

    let guard = init_from_config(&config).unwrap();
    tracing::debug!(target: "test_logging", "session ready for SCH");

    // a second install is refused instead of replacing the first
    assert!(matches!(init_from_config(&config), Err(TassError::Config(_))));
    drop(guard);

    let files: Vec<_> = std::fs::read_dir(&log_dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1, "{files:?}");
    assert!(files[0].file_name().unwrap().to_string_lossy().starts_with("tassapi.log"));

    let contents = std::fs::read_to_string(&files[0]).unwrap();
    assert!(contents.contains("logging initialized at level="), "{contents}");
    assert!(contents.contains("session ready for SCH"));
}
