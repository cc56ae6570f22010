// crates/uplink-gate-core/tests/dedup.rs
// ============================================================================
// Module: Duplicate Arbiter Tests
// Description: Single-winner election among concurrent uplink reports.
// ============================================================================
//! ## Overview
//! Validates the winner/retry/duplicate classification and the at-most-one
//! winner property under concurrent submission.

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
use std::thread;

use uplink_gate_core::DeviceId;
use uplink_gate_core::GatewayId;
use uplink_gate_core::runtime::DuplicateArbiter;
use uplink_gate_core::runtime::DuplicateCheckRequest;
use uplink_gate_core::runtime::InMemoryLeaseStore;

fn request(device: &str, gateway: &str, up: u32) -> DuplicateCheckRequest {
    DuplicateCheckRequest {
        device_id: DeviceId::new(device),
        gateway_id: GatewayId::new(gateway),
        fcnt_up: up,
        fcnt_down: 0,
    }
}

#[test]
fn first_report_wins_and_later_gateways_lose() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = DuplicateArbiter::new(store);

    let first = arbiter.check(&request("dev-1", "gw-a", 1)).unwrap();
    assert!(!first.is_duplicate);
    assert_eq!(first.gateway_id, GatewayId::new("gw-a"));

    let second = arbiter.check(&request("dev-1", "gw-b", 1)).unwrap();
    assert!(second.is_duplicate);
    assert_eq!(second.gateway_id, GatewayId::new("gw-a"));

    // A retry by the first reporter is still legitimate.
    let retry = arbiter.check(&request("dev-1", "gw-a", 1)).unwrap();
    assert!(!retry.is_duplicate);
    assert_eq!(retry.gateway_id, GatewayId::new("gw-a"));

    // A new uplink counter hands ownership to its first reporter.
    let next = arbiter.check(&request("dev-1", "gw-b", 2)).unwrap();
    assert!(!next.is_duplicate);
    assert_eq!(next.gateway_id, GatewayId::new("gw-b"));
}

#[test]
fn concurrent_reports_elect_exactly_one_winner() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let arbiter = Arc::new(DuplicateArbiter::new(store));
    let gateways = ["gw-a", "gw-b", "gw-c", "gw-d", "gw-e", "gw-f"];

    let handles: Vec<_> = gateways
        .iter()
        .map(|gateway| {
            let arbiter = Arc::clone(&arbiter);
            let gateway = (*gateway).to_string();
            thread::spawn(move || arbiter.check(&request("dev-1", &gateway, 1)).unwrap())
        })
        .collect();

    let verdicts: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    let winners = verdicts.iter().filter(|verdict| !verdict.is_duplicate).count();
    assert_eq!(winners, 1, "exactly one gateway must win the uplink");

    let owner = &verdicts.iter().find(|verdict| !verdict.is_duplicate).unwrap().gateway_id;
    for verdict in &verdicts {
        if verdict.is_duplicate {
            assert_eq!(&verdict.gateway_id, owner, "losers must learn the owner");
        }
    }
}
