// crates/uplink-gate-config/tests/boundary_validation.rs
// ============================================================================
// Module: Config Boundary Tests
// Description: Out-of-range values fail closed during validation.
// ============================================================================
//! ## Overview
//! Every numeric knob has a hard range; values outside it must be rejected
//! before the service starts.

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

use uplink_gate_config::ConfigError;
use uplink_gate_config::UplinkGateConfig;

fn expect_invalid(document: &str, needle: &str) {
    let config: UplinkGateConfig = toml::from_str(document).unwrap();
    let err = config.validate().unwrap_err();
    let ConfigError::Invalid(message) = err else {
        panic!("expected Invalid, got {err:?}");
    };
    assert!(message.contains(needle), "message {message:?} must mention {needle:?}");
}

#[test]
fn lease_ttl_below_minimum_is_rejected() {
    expect_invalid("[leases]\ndevice_lease_ttl_ms = 10\n", "device_lease_ttl_ms");
}

#[test]
fn lease_ttl_above_maximum_is_rejected() {
    expect_invalid("[leases]\ndevice_lease_ttl_ms = 600000\n", "device_lease_ttl_ms");
}

#[test]
fn zero_adr_window_is_rejected() {
    expect_invalid("[adr]\nwindow_capacity = 0\n", "window_capacity");
}

#[test]
fn oversized_adr_window_is_rejected() {
    expect_invalid("[adr]\nwindow_capacity = 1000\n", "window_capacity");
}

#[test]
fn preferred_window_out_of_range_is_rejected() {
    expect_invalid("[preferred_gateway]\nwindow_ms = 10\n", "window_ms");
    expect_invalid("[preferred_gateway]\nwindow_ms = 60000\n", "window_ms");
}

#[test]
fn sync_page_size_and_tick_are_bounded() {
    expect_invalid("[address_sync]\npage_size = 0\n", "page_size");
    expect_invalid("[address_sync]\npage_size = 100000\n", "page_size");
    expect_invalid("[address_sync]\ntick_ms = 10\n", "tick_ms");
}

#[test]
fn gate_ordering_is_enforced() {
    // The full gate must outlive the delta gate.
    expect_invalid(
        "[address_sync]\nfull_gate_ttl_ms = 1000\ndelta_gate_ttl_ms = 5000\nfull_retry_ttl_ms = 500\n",
        "full_gate_ttl_ms",
    );
    // The failure retry must be shorter than the full gate.
    expect_invalid(
        "[address_sync]\nfull_gate_ttl_ms = 10000\ndelta_gate_ttl_ms = 5000\nfull_retry_ttl_ms = 20000\n",
        "full_retry_ttl_ms",
    );
}

#[test]
fn zero_gate_ttls_are_rejected() {
    expect_invalid("[address_sync]\nfull_retry_ttl_ms = 0\n", "full_retry_ttl_ms");
    expect_invalid("[address_sync]\nlookup_lock_ttl_ms = 0\n", "lookup_lock_ttl_ms");
}
