// crates/uplink-gate-core/tests/frame_counter.rs
// ============================================================================
// Module: Frame-Counter Tests
// Description: Counter arbitration semantics across gateways and retries.
// ============================================================================
//! ## Overview
//! Validates the counter-ordering rules: initialization, new uplinks,
//! same-gateway retries, duplicate reports, and the guarded reset.

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

use std::sync::Arc;

use uplink_gate_core::DeviceId;
use uplink_gate_core::GatewayId;
use uplink_gate_core::runtime::FrameCounterArbiter;
use uplink_gate_core::runtime::FrameCounterRequest;
use uplink_gate_core::runtime::InMemoryLeaseStore;

fn request(device: &str, gateway: &str, up: u32, down: u32) -> FrameCounterRequest {
    FrameCounterRequest {
        device_id: DeviceId::new(device),
        gateway_id: GatewayId::new(gateway),
        client_fcnt_up: up,
        client_fcnt_down: down,
        reset: false,
    }
}

#[test]
fn fresh_device_initializes_to_client_down_plus_one() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = FrameCounterArbiter::new(store);
    let reply = arbiter.next_fcnt_down(&request("dev-1", "gw-a", 1, 1)).unwrap();
    assert_eq!(reply.next_fcnt_down, 2);
}

#[test]
fn counter_sequence_follows_the_ordering_rules() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = FrameCounterArbiter::new(store);
    assert_eq!(arbiter.next_fcnt_down(&request("dev-1", "gw-a", 1, 1)).unwrap().next_fcnt_down, 2);
    assert_eq!(arbiter.next_fcnt_down(&request("dev-1", "gw-a", 2, 1)).unwrap().next_fcnt_down, 3);
    assert_eq!(
        arbiter.next_fcnt_down(&request("dev-1", "gw-a", 3, 10)).unwrap().next_fcnt_down,
        11
    );
}

#[test]
fn same_gateway_retry_advances_from_cached_down() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = FrameCounterArbiter::new(store);
    // First delivery leaves the record at {up: 1, down: 2}.
    assert_eq!(arbiter.next_fcnt_down(&request("dev-1", "gw-a", 1, 1)).unwrap().next_fcnt_down, 2);
    // The same gateway retrying the same uplink advances again.
    assert_eq!(arbiter.next_fcnt_down(&request("dev-1", "gw-a", 1, 1)).unwrap().next_fcnt_down, 3);
}

#[test]
fn late_report_from_other_gateway_gets_zero() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = FrameCounterArbiter::new(store);
    assert_eq!(arbiter.next_fcnt_down(&request("dev-1", "gw-a", 5, 1)).unwrap().next_fcnt_down, 2);
    let late = arbiter.next_fcnt_down(&request("dev-1", "gw-b", 5, 1)).unwrap();
    assert_eq!(late.next_fcnt_down, 0);
}

#[test]
fn non_zero_replies_never_decrease() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = FrameCounterArbiter::new(store);
    let mut previous = 0;
    let calls = [
        ("gw-a", 1, 1),
        ("gw-b", 2, 0),
        ("gw-a", 2, 0),
        ("gw-b", 3, 7),
        ("gw-b", 3, 7),
        ("gw-a", 4, 2),
    ];
    for (gateway, up, down) in calls {
        let reply = arbiter.next_fcnt_down(&request("dev-1", gateway, up, down)).unwrap();
        if reply.next_fcnt_down != 0 {
            assert!(reply.next_fcnt_down >= previous, "regressed at up={up}");
            previous = reply.next_fcnt_down;
        }
    }
}

#[test]
fn reset_clears_only_progressed_sessions() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = FrameCounterArbiter::new(store);
    // Fresh record at up=1 must survive a racing reset.
    assert_eq!(arbiter.next_fcnt_down(&request("dev-1", "gw-a", 1, 1)).unwrap().next_fcnt_down, 2);
    let mut reset = request("dev-1", "gw-a", 1, 1);
    reset.reset = true;
    assert_eq!(arbiter.next_fcnt_down(&reset).unwrap().next_fcnt_down, 3);

    // A progressed record is discarded and the counter restarts.
    assert_eq!(arbiter.next_fcnt_down(&request("dev-2", "gw-a", 9, 5)).unwrap().next_fcnt_down, 6);
    let mut reset = request("dev-2", "gw-a", 1, 0);
    reset.reset = true;
    assert_eq!(arbiter.next_fcnt_down(&reset).unwrap().next_fcnt_down, 1);
}
