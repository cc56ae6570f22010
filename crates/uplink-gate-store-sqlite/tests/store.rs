// crates/uplink-gate-store-sqlite/tests/store.rs
// ============================================================================
// Module: SQLite Lease Store Tests
// Description: Lease, TTL, hash, and list semantics on a real database file.
// ============================================================================
//! ## Overview
//! Validates that the durable backend honors the same contract as the
//! in-memory store: lease exclusivity and expiry, set-if-absent, hash
//! whole-key TTLs, list ordering and trimming, and persistence across
//! re-opens.

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

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use uplink_gate_core::LeaseStore;
use uplink_gate_store_sqlite::SqliteLeaseStore;
use uplink_gate_store_sqlite::SqliteLeaseStoreConfig;
use uplink_gate_store_sqlite::SqliteStoreError;

fn open(dir: &TempDir) -> SqliteLeaseStore {
    SqliteLeaseStore::new(&SqliteLeaseStoreConfig {
        path: dir.path().join("store.db"),
        busy_timeout_ms: 5_000,
        journal_mode: Default::default(),
        sync_mode: Default::default(),
    })
    .unwrap()
}

#[test]
fn rejects_directory_paths() {
    let dir = TempDir::new().unwrap();
    let err = SqliteLeaseStore::new(&SqliteLeaseStoreConfig {
        path: dir.path().to_path_buf(),
        busy_timeout_ms: 5_000,
        journal_mode: Default::default(),
        sync_mode: Default::default(),
    })
    .unwrap_err();
    assert!(matches!(err, SqliteStoreError::Invalid(_)));
}

#[test]
fn leases_are_exclusive_and_expire() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    assert!(store.acquire_once("lock:dev", "gw-a", Duration::from_millis(40)).unwrap());
    assert!(!store.acquire_once("lock:dev", "gw-b", Duration::from_millis(40)).unwrap());
    thread::sleep(Duration::from_millis(50));
    assert!(store.acquire_once("lock:dev", "gw-b", Duration::from_secs(1)).unwrap());
    // The expired holder's release is reported as a failure, not an error.
    assert!(!store.release("lock:dev", "gw-a").unwrap());
    assert!(store.release("lock:dev", "gw-b").unwrap());
}

#[test]
fn values_round_trip_and_expire() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.set("k", "v1", None).unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));
    store.set("k", "v2", Some(Duration::from_millis(30))).unwrap();
    assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
    thread::sleep(Duration::from_millis(40));
    assert!(store.get("k").unwrap().is_none());
    assert!(!store.exists("k").unwrap());
}

#[test]
fn set_if_absent_is_first_writer_wins() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    assert!(store.set_if_absent("nonce", "1", None).unwrap());
    assert!(!store.set_if_absent("nonce", "2", None).unwrap());
    assert_eq!(store.get("nonce").unwrap().as_deref(), Some("1"));
    // An expired guard can be claimed again.
    store.delete("nonce").unwrap();
    assert!(store.set_if_absent("nonce", "3", Some(Duration::from_millis(20))).unwrap());
    thread::sleep(Duration::from_millis(30));
    assert!(store.set_if_absent("nonce", "4", None).unwrap());
}

#[test]
fn hashes_expire_as_a_whole_and_support_replace_all() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.hash_set("h", "a", "1", Some(Duration::from_millis(30))).unwrap();
    store.hash_set("h", "b", "2", None).unwrap();
    assert_eq!(store.hash_get_all("h").unwrap().len(), 2);
    thread::sleep(Duration::from_millis(40));
    // The second write did not refresh the TTL, so the whole hash lapsed.
    assert!(store.hash_get_all("h").unwrap().is_empty());

    let mut entries = BTreeMap::new();
    entries.insert("x".to_string(), "9".to_string());
    store.hash_replace_all("h", &entries, None).unwrap();
    assert_eq!(store.hash_get("h", "x").unwrap().as_deref(), Some("9"));
    assert!(store.hash_delete("h", "x").unwrap());
    assert!(!store.hash_delete("h", "x").unwrap());
}

#[test]
fn lists_keep_order_and_trim_oldest() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    for value in ["1", "2", "3", "4", "5"] {
        store.list_append("l", value, None).unwrap();
    }
    assert_eq!(store.list_range("l").unwrap(), vec!["1", "2", "3", "4", "5"]);
    store.list_trim("l", 2).unwrap();
    assert_eq!(store.list_range("l").unwrap(), vec!["4", "5"]);
    assert_eq!(store.list_append("l", "6", None).unwrap(), 3);
}

#[test]
fn state_survives_a_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        store.set("k", "persisted", None).unwrap();
        store.list_append("l", "entry", None).unwrap();
    }
    let store = open(&dir);
    assert_eq!(store.get("k").unwrap().as_deref(), Some("persisted"));
    assert_eq!(store.list_range("l").unwrap(), vec!["entry"]);
    store.readiness().unwrap();
}
