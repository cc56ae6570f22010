// crates/uplink-gate-core/tests/notify.rs
// ============================================================================
// Module: Cache Reset Notifier Tests
// Description: Administrative reset fan-out and per-target failure reporting.
// ============================================================================
//! ## Overview
//! Validates that the administrative reset clears the counter record without
//! lease semantics and reports delivery failures instead of raising them.

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

mod common;

use std::sync::Arc;

use common::FakeBroadcaster;
use common::FakeInvoker;
use uplink_gate_core::CancelToken;
use uplink_gate_core::DeviceId;
use uplink_gate_core::GatewayId;
use uplink_gate_core::LeaseStore;
use uplink_gate_core::runtime::CacheResetNotifier;
use uplink_gate_core::runtime::InMemoryLeaseStore;
use uplink_gate_core::runtime::notify::CACHE_RESET_METHOD;
use uplink_gate_core::runtime::notify::CACHE_RESET_TOPIC;

#[test]
fn reset_clears_the_record_and_notifies_every_channel() {
    let store = Arc::new(InMemoryLeaseStore::new());
    store.set("counter:dev-1", "{\"fcnt_up\":5,\"fcnt_down\":9,\"gateway_id\":\"gw-a\"}", None)
        .unwrap();
    // Another instance holds the device lease; the administrative override
    // does not care.
    assert!(store
        .acquire_once("lock:dev-1", "someone-else", std::time::Duration::from_secs(30))
        .unwrap());

    let invoker = Arc::new(FakeInvoker::new());
    invoker.fail_for("gw-b");
    let broadcaster = Arc::new(FakeBroadcaster::new());
    let notifier = CacheResetNotifier::new(
        Arc::clone(&store) as Arc<_>,
        Arc::clone(&invoker) as Arc<_>,
        Arc::clone(&broadcaster) as Arc<_>,
    );

    let report = notifier
        .reset_device_cache(
            &DeviceId::new("dev-1"),
            &[GatewayId::new("gw-a"), GatewayId::new("gw-b")],
            &CancelToken::new(),
        )
        .unwrap();

    assert!(store.get("counter:dev-1").unwrap().is_none(), "record cleared unconditionally");
    assert_eq!(report.notified, vec![GatewayId::new("gw-a")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, GatewayId::new("gw-b"));
    assert!(report.broadcast);

    let calls = invoker.calls.lock().unwrap();
    assert!(calls.iter().all(|(_, method)| method == CACHE_RESET_METHOD));
    let published = broadcaster.published.lock().unwrap();
    assert_eq!(published[0], (CACHE_RESET_TOPIC.to_string(), "dev-1".to_string()));
}
