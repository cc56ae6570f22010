// crates/uplink-gate-core/tests/lease_store.rs
// ============================================================================
// Module: Lease Store Tests
// Description: Lease semantics, TTL expiry, and the lease-violation guard.
// ============================================================================
//! ## Overview
//! Validates the in-memory store's lease primitive (ownership, expiry,
//! reported-not-thrown release failures), set-if-absent, hash and list
//! operations, and the device cache's fail-fast misuse guard.

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
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use uplink_gate_core::AcquireMode;
use uplink_gate_core::DeviceId;
use uplink_gate_core::LeaseStore;
use uplink_gate_core::runtime::CacheError;
use uplink_gate_core::runtime::DeviceCache;
use uplink_gate_core::runtime::InMemoryLeaseStore;

#[test]
fn leases_are_exclusive_until_released_or_expired() {
    let store = InMemoryLeaseStore::new();
    let ttl = Duration::from_millis(50);
    assert!(store.acquire_once("lock:dev", "gw-a", ttl).unwrap());
    assert!(!store.acquire_once("lock:dev", "gw-b", ttl).unwrap());
    // Re-entrant refresh by the holder.
    assert!(store.acquire_once("lock:dev", "gw-a", ttl).unwrap());
    // Release by a non-owner is reported, not thrown.
    assert!(!store.release("lock:dev", "gw-b").unwrap());
    assert!(store.release("lock:dev", "gw-a").unwrap());
    assert!(store.acquire_once("lock:dev", "gw-b", ttl).unwrap());
}

#[test]
fn expired_leases_can_be_taken_over() {
    let store = InMemoryLeaseStore::new();
    assert!(store.acquire_once("lock:dev", "gw-a", Duration::from_millis(20)).unwrap());
    thread::sleep(Duration::from_millis(30));
    assert!(store.acquire_once("lock:dev", "gw-b", Duration::from_millis(50)).unwrap());
    // The crashed holder's late release is reported as a failure.
    assert!(!store.release("lock:dev", "gw-a").unwrap());
}

#[test]
fn blocking_acquire_waits_for_the_holder() {
    let store = Arc::new(InMemoryLeaseStore::new());
    assert!(store.acquire_once("lock:dev", "gw-a", Duration::from_secs(5)).unwrap());
    let contender = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            store.try_acquire("lock:dev", "gw-b", Duration::from_secs(2), AcquireMode::Block)
        })
    };
    thread::sleep(Duration::from_millis(100));
    assert!(store.release("lock:dev", "gw-a").unwrap());
    assert!(contender.join().unwrap().unwrap(), "blocked contender must win after release");
}

#[test]
fn set_if_absent_is_first_writer_wins() {
    let store = InMemoryLeaseStore::new();
    assert!(store.set_if_absent("nonce:dev:1", "1", None).unwrap());
    assert!(!store.set_if_absent("nonce:dev:1", "2", None).unwrap());
    assert_eq!(store.get("nonce:dev:1").unwrap().as_deref(), Some("1"));
}

#[test]
fn values_expire_after_their_ttl() {
    let store = InMemoryLeaseStore::new();
    store.set("k", "v", Some(Duration::from_millis(20))).unwrap();
    assert!(store.exists("k").unwrap());
    thread::sleep(Duration::from_millis(30));
    assert!(!store.exists("k").unwrap());
    assert!(store.get("k").unwrap().is_none());
}

#[test]
fn hash_replace_all_swaps_the_whole_hash() {
    let store = InMemoryLeaseStore::new();
    store.hash_set("h", "a", "1", None).unwrap();
    let mut entries = BTreeMap::new();
    entries.insert("b".to_string(), "2".to_string());
    store.hash_replace_all("h", &entries, None).unwrap();
    assert!(store.hash_get("h", "a").unwrap().is_none());
    assert_eq!(store.hash_get("h", "b").unwrap().as_deref(), Some("2"));
    assert_eq!(store.hash_get_all("h").unwrap().len(), 1);
}

#[test]
fn list_trim_drops_oldest_entries() {
    let store = InMemoryLeaseStore::new();
    for value in ["1", "2", "3", "4", "5"] {
        store.list_append("l", value, None).unwrap();
    }
    store.list_trim("l", 3).unwrap();
    assert_eq!(store.list_range("l").unwrap(), vec!["3", "4", "5"]);
}

#[test]
fn device_cache_refuses_access_without_the_lease() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let cache = DeviceCache::new(store, DeviceId::new("dev-1"), "gw-a");
    let err = cache.try_get_info().unwrap_err();
    assert!(matches!(err, CacheError::LeaseViolation(_)));
}

#[test]
fn device_cache_releases_on_drop() {
    let store = Arc::new(InMemoryLeaseStore::new());
    {
        let mut cache =
            DeviceCache::new(Arc::clone(&store) as Arc<_>, DeviceId::new("dev-1"), "gw-a");
        assert!(cache.try_lock(AcquireMode::Once).unwrap());
        assert!(cache.holds_lease());
        // Dropped without an explicit unlock.
    }
    assert!(
        store.acquire_once("lock:dev-1", "gw-b", Duration::from_secs(1)).unwrap(),
        "drop must release the lease on every exit path"
    );
}
