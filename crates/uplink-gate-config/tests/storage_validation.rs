// crates/uplink-gate-config/tests/storage_validation.rs
// ============================================================================
// Module: Config Storage Tests
// Description: Backend selection parsing and file loading rules.
// ============================================================================
//! ## Overview
//! Validates lease-store backend selection, its option validation, and the
//! strict file loading path.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::fs;

use tempfile::TempDir;
use uplink_gate_config::ConfigError;
use uplink_gate_config::LeaseStoreSection;
use uplink_gate_config::UplinkGateConfig;

#[test]
fn sqlite_backend_parses_with_options() {
    let config: UplinkGateConfig = toml::from_str(
        "[lease_store]\n\
         backend = \"sqlite\"\n\
         path = \"/var/lib/uplink-gate/store.db\"\n\
         busy_timeout_ms = 2500\n\
         journal_mode = \"wal\"\n\
         sync_mode = \"normal\"\n",
    )
    .unwrap();
    config.validate().unwrap();
    let LeaseStoreSection::Sqlite(store) = &config.lease_store else {
        panic!("expected sqlite backend");
    };
    assert_eq!(store.busy_timeout_ms, 2_500);
}

#[test]
fn sqlite_backend_requires_a_path() {
    let config: UplinkGateConfig = toml::from_str(
        "[lease_store]\n\
         backend = \"sqlite\"\n\
         path = \"\"\n",
    )
    .unwrap();
    let err = config.validate().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn unknown_backend_fails_to_parse() {
    let result: Result<UplinkGateConfig, _> =
        toml::from_str("[lease_store]\nbackend = \"etcd\"\n");
    assert!(result.is_err());
}

#[test]
fn load_reads_and_validates_a_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uplink-gate.toml");
    fs::write(&path, "[adr]\nwindow_capacity = 10\n").unwrap();
    let config = UplinkGateConfig::load(Some(&path)).unwrap();
    assert_eq!(config.adr.window_capacity, 10);
}

#[test]
fn load_rejects_invalid_documents() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uplink-gate.toml");
    fs::write(&path, "[adr]\nwindow_capacity = 0\n").unwrap();
    let err = UplinkGateConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn load_rejects_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uplink-gate.toml");
    fs::write(&path, "not toml = [").unwrap();
    let err = UplinkGateConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn load_reports_missing_files_as_io_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.toml");
    let err = UplinkGateConfig::load(Some(&path)).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}
