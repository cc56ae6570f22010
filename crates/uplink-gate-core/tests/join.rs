// crates/uplink-gate-core/tests/join.rs
// ============================================================================
// Module: Join Handler Tests
// Description: Nonce replay, unknown devices, and ownership refusals.
// ============================================================================
//! ## Overview
//! Validates the join refusal taxonomy and the exactly-once nonce guarantee
//! under concurrent submission.

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
use std::thread;

use common::FakeRegistry;
use uplink_gate_core::CancelToken;
use uplink_gate_core::DevNonce;
use uplink_gate_core::DeviceId;
use uplink_gate_core::GatewayId;
use uplink_gate_core::runtime::InMemoryLeaseStore;
use uplink_gate_core::runtime::JoinHandler;
use uplink_gate_core::runtime::JoinOutcome;
use uplink_gate_core::runtime::JoinRefusal;
use uplink_gate_core::runtime::JoinRequest;

fn join(device: &str, gateway: &str, nonce: u32) -> JoinRequest {
    JoinRequest {
        device_id: DeviceId::new(device),
        gateway_id: GatewayId::new(gateway),
        dev_nonce: DevNonce::new(nonce),
    }
}

#[test]
fn unknown_device_is_refused_not_faulted() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let registry = Arc::new(FakeRegistry::new());
    let handler = JoinHandler::new(store, registry);
    let outcome = handler.handle(&join("dev-x", "gw-a", 1), &CancelToken::new()).unwrap();
    assert_eq!(outcome, JoinOutcome::Refused(JoinRefusal::UnknownDevice));
    assert_eq!(JoinRefusal::UnknownDevice.reason(), "not in our network");
}

#[test]
fn replayed_nonce_is_refused() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let registry = Arc::new(FakeRegistry::new());
    registry.insert_identity("dev-1", "key-1");
    let handler = JoinHandler::new(store, registry);
    let cancel = CancelToken::new();

    let first = handler.handle(&join("dev-1", "gw-a", 42), &cancel).unwrap();
    assert!(matches!(first, JoinOutcome::Accepted { .. }));

    let replay = handler.handle(&join("dev-1", "gw-a", 42), &cancel).unwrap();
    assert_eq!(replay, JoinOutcome::Refused(JoinRefusal::NonceAlreadyUsed));

    // A fresh nonce from the owning gateway is fine.
    let fresh = handler.handle(&join("dev-1", "gw-a", 43), &cancel).unwrap();
    assert!(matches!(fresh, JoinOutcome::Accepted { .. }));
}

#[test]
fn second_gateway_is_refused_while_the_session_lives() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let registry = Arc::new(FakeRegistry::new());
    registry.insert_identity("dev-1", "key-1");
    let handler = JoinHandler::new(store, registry);
    let cancel = CancelToken::new();

    let first = handler.handle(&join("dev-1", "gw-a", 1), &cancel).unwrap();
    assert_eq!(
        first,
        JoinOutcome::Accepted {
            desired_gateway_id: GatewayId::new("gw-a"),
        }
    );

    let intruder = handler.handle(&join("dev-1", "gw-b", 2), &cancel).unwrap();
    assert_eq!(intruder, JoinOutcome::Refused(JoinRefusal::NotOwningGateway));
    assert_eq!(JoinRefusal::NotOwningGateway.reason(), "not the owning gateway");
}

#[test]
fn concurrent_same_nonce_joins_accept_exactly_once() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let registry = Arc::new(FakeRegistry::new());
    registry.insert_identity("dev-1", "key-1");
    let handler = Arc::new(JoinHandler::new(store, registry));

    let handles: Vec<_> = (0 .. 8)
        .map(|_| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                handler.handle(&join("dev-1", "gw-a", 7), &CancelToken::new()).unwrap()
            })
        })
        .collect();

    let outcomes: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    let accepted = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, JoinOutcome::Accepted { .. }))
        .count();
    assert_eq!(accepted, 1, "a (device, nonce) pair is accepted at most once");
    for outcome in &outcomes {
        if !matches!(outcome, JoinOutcome::Accepted { .. }) {
            assert_eq!(outcome, &JoinOutcome::Refused(JoinRefusal::NonceAlreadyUsed));
        }
    }
}
