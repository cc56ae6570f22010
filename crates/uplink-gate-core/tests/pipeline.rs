// crates/uplink-gate-core/tests/pipeline.rs
// ============================================================================
// Module: Bundler Pipeline Tests
// Description: Fixed-order composition and loser-withholds-confirm rules.
// ============================================================================
//! ## Overview
//! Validates bundle aggregation: omitted fields for unrequested operations,
//! the single shared downlink advance, and non-confirming outcomes for
//! deduplication losers.

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
use std::time::Duration;

use uplink_gate_core::DeviceId;
use uplink_gate_core::GatewayId;
use uplink_gate_core::runtime::AdrEngine;
use uplink_gate_core::runtime::Bundler;
use uplink_gate_core::runtime::BundlerRequest;
use uplink_gate_core::runtime::InMemoryLeaseStore;
use uplink_gate_core::runtime::MarginAdrStrategy;
use uplink_gate_core::runtime::Operations;
use uplink_gate_core::runtime::PipelineError;
use uplink_gate_core::runtime::PreferredGatewayArbiter;

fn bundler(store: &Arc<InMemoryLeaseStore>, adr_capacity: usize) -> Bundler {
    let store: Arc<InMemoryLeaseStore> = Arc::clone(store);
    let adr = Arc::new(AdrEngine::with_capacity(
        Arc::clone(&store) as Arc<_>,
        Arc::new(MarginAdrStrategy),
        adr_capacity,
    ));
    let preferred = Arc::new(PreferredGatewayArbiter::with_window(
        Arc::clone(&store) as Arc<_>,
        Duration::from_millis(50),
    ));
    Bundler::new(store, adr, preferred)
}

fn request(device: &str, gateway: &str, operations: Operations, up: u32) -> BundlerRequest {
    BundlerRequest {
        device_id: DeviceId::new(device),
        gateway_id: GatewayId::new(gateway),
        operations,
        client_fcnt_up: up,
        client_fcnt_down: 0,
        snr: Some(-3.0),
        data_rate: Some(2),
        required_tx_power: Some(7),
        rssi: Some(-60.0),
    }
}

#[test]
fn empty_bundles_are_rejected() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let bundler = bundler(&store, 20);
    let err = bundler
        .handle(&request("dev-1", "gw-a", Operations::default(), 1))
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyOperations));
}

#[test]
fn reply_omits_fields_for_unrequested_operations() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let bundler = bundler(&store, 20);
    let reply = bundler.handle(&request("dev-1", "gw-a", Operations::DEDUP, 1)).unwrap();
    assert!(reply.dedup.is_some());
    assert!(reply.adr.is_none());
    assert!(reply.next_fcnt_down.is_none());
    assert!(reply.preferred_gateway.is_none());
    assert!(reply.error_message.is_none());
}

#[test]
fn dedup_loser_gets_non_confirming_outcomes() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let bundler = bundler(&store, 1);
    let operations = Operations::DEDUP.union(Operations::ADR).union(Operations::FRAME_COUNTER);

    let winner = bundler.handle(&request("dev-1", "gw-a", operations, 1)).unwrap();
    assert!(!winner.dedup.as_ref().unwrap().is_duplicate);
    assert_eq!(winner.next_fcnt_down, Some(1));

    let loser = bundler.handle(&request("dev-1", "gw-b", operations, 1)).unwrap();
    assert!(loser.dedup.as_ref().unwrap().is_duplicate);
    assert_eq!(loser.dedup.as_ref().unwrap().gateway_id, GatewayId::new("gw-a"));
    assert_eq!(loser.next_fcnt_down, Some(0), "losers must not be told to confirm");
    assert!(!loser.adr.as_ref().unwrap().can_confirm_to_device);
}

#[test]
fn adr_and_frame_counter_share_one_advance() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let bundler = bundler(&store, 1);
    let operations = Operations::ADR.union(Operations::FRAME_COUNTER);

    let reply = bundler.handle(&request("dev-1", "gw-a", operations, 1)).unwrap();
    let adr = reply.adr.as_ref().unwrap();
    assert!(adr.can_confirm_to_device);
    // One bundle, one advance: both items report the same counter.
    assert_eq!(adr.fcnt_down, reply.next_fcnt_down);
}

#[test]
fn frame_counter_alone_matches_the_standalone_arbiter() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let bundler = bundler(&store, 20);
    let reply = bundler
        .handle(&request("dev-1", "gw-a", Operations::FRAME_COUNTER, 1))
        .unwrap();
    assert_eq!(reply.next_fcnt_down, Some(1));
    let retry = bundler
        .handle(&request("dev-1", "gw-a", Operations::FRAME_COUNTER, 1))
        .unwrap();
    assert_eq!(retry.next_fcnt_down, Some(2));
}

#[test]
fn preferred_gateway_rides_inside_the_bundle() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let bundler = bundler(&store, 20);
    let reply = bundler
        .handle(&request("dev-1", "gw-a", Operations::PREFERRED_GATEWAY, 1))
        .unwrap();
    let preferred = reply.preferred_gateway.as_ref().unwrap();
    assert_eq!(preferred.preferred_gateway_id, GatewayId::new("gw-a"));
    assert!(!preferred.conflict);
}

#[test]
fn missing_adr_payload_is_an_invalid_request() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let bundler = bundler(&store, 20);
    let mut request = request("dev-1", "gw-a", Operations::ADR, 1);
    request.snr = None;
    let err = bundler.handle(&request).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRequest(_)));
}
