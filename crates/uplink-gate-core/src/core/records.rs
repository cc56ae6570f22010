// crates/uplink-gate-core/src/core/records.rs
// ============================================================================
// Module: Uplink Gate Record Model
// Description: Cached per-device records and the lease-store key layout.
// Purpose: Define the shared state arbitrated across service instances.
// Dependencies: crate::core::{identifiers, time}, serde
// ============================================================================

//! ## Overview
//! All coordination state lives in the lease store as JSON documents keyed by
//! the helpers in this module. Records are created lazily on first use,
//! refreshed on each arbitration, and garbage-collected by TTL; the only
//! explicit delete paths are the administrative cache reset and the address
//! synchronizer's full-reload pruning.
//! Invariants:
//! - Mutable record fields change only while the device lease is held.
//! - `fcnt_down` is non-decreasing per device across all writers.
//! - The ADR window is bounded; oldest samples are evicted first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DevAddr;
use crate::core::identifiers::DevNonce;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Default Lifetimes
// ============================================================================

/// Lifetime of a device counter record.
pub const DEVICE_COUNTER_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Lifetime of a join validation record.
pub const JOIN_VALIDATION_TTL: Duration = Duration::from_secs(60 * 60);
/// Lifetime of a join-nonce replay guard entry.
pub const DEV_NONCE_TTL: Duration = Duration::from_secs(5 * 60);
/// Lifetime of a device-address hash; reset on every write.
pub const DEVICE_ADDRESS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Lifetime of the per-device lease taken by arbitration.
pub const DEVICE_LEASE_TTL: Duration = Duration::from_secs(30);
/// Default bound of the ADR sample window.
pub const ADR_WINDOW_CAPACITY: usize = 20;
/// Default preferred-gateway collection window.
pub const PREFERRED_GATEWAY_WINDOW: Duration = Duration::from_millis(400);
/// Lifetime of the full-reload gate; one full reload per cycle fleet-wide.
pub const FULL_RELOAD_GATE_TTL: Duration = Duration::from_secs(25 * 60 * 60);
/// Shortened full-reload gate lifetime applied after a failed reload.
pub const FULL_RELOAD_RETRY_TTL: Duration = Duration::from_secs(60);
/// Lifetime of the delta-reload gate.
pub const DELTA_RELOAD_GATE_TTL: Duration = Duration::from_secs(5 * 60);
/// Lifetime of the global-update gate serializing full reloads.
pub const GLOBAL_UPDATE_GATE_TTL: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// SECTION: Records
// ============================================================================

/// Per-device frame counter record.
///
/// # Invariants
/// - `fcnt_down` never decreases once persisted.
/// - `gateway_id` names the gateway that first reported the current `fcnt_up`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCounterRecord {
    /// Highest uplink counter reported so far.
    pub fcnt_up: u32,
    /// Last downlink counter handed out.
    pub fcnt_down: u32,
    /// Gateway owning the current uplink counter.
    pub gateway_id: GatewayId,
}

/// Join validation record written when a join request is accepted.
///
/// # Invariants
/// - `network_key` is the identity secret fetched from the registry at join
///   time; it is never derived locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinValidationRecord {
    /// Identity secret for the joining device.
    pub network_key: String,
    /// Gateway the device asked to own its session.
    pub desired_gateway_id: GatewayId,
}

/// One device entry inside a device-address hash.
///
/// # Invariants
/// - `network_key` is retained only while the source twin's `last_updated`
///   matches the value recorded here; otherwise it is cleared on upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddressRecord {
    /// Device identifier resolved for the address.
    pub device_id: DeviceId,
    /// Owning gateway, when the twin reports one.
    pub gateway_id: Option<GatewayId>,
    /// Identity secret, present only while the twin is unchanged.
    pub network_key: Option<String>,
    /// Source twin `last_updated` at cache time (millisecond precision).
    pub last_updated: Timestamp,
}

/// One accepted ADR sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdrSample {
    /// Gateway that won the sample's uplink counter.
    pub gateway_id: GatewayId,
    /// Signal-to-noise ratio observed by the winning gateway.
    pub snr: f64,
    /// Data rate the device used for the uplink.
    pub data_rate: u8,
    /// Uplink counter of the sample.
    pub fcnt_up: u32,
    /// Downlink counter observed with the sample.
    pub fcnt_down: u32,
}

/// Most recently accepted ADR entry with its repeat bookkeeping.
///
/// # Invariants
/// - `repeat_count` counts the gateways that reported `fcnt_up`, starting at 1.
/// - `gateway_id`/`snr` track the best-SNR reporter for `fcnt_up`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdrLastEntry {
    /// Best-SNR gateway for the current uplink counter.
    pub gateway_id: GatewayId,
    /// Best signal-to-noise ratio seen for the current uplink counter.
    pub snr: f64,
    /// Uplink counter the entry tracks.
    pub fcnt_up: u32,
    /// Number of gateways that reported this counter so far.
    pub repeat_count: u32,
}

/// Rolling preferred-gateway election state for one device.
///
/// # Invariants
/// - `best_rssi` only improves while `current_fcnt_up` is unchanged; a larger
///   counter discards the state and opens a fresh window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferredGatewayState {
    /// Highest uplink counter seen in the current window.
    pub current_fcnt_up: u32,
    /// Gateway with the best reception for `current_fcnt_up`.
    pub best_gateway_id: GatewayId,
    /// Best RSSI observed for `current_fcnt_up`.
    pub best_rssi: f64,
    /// Wall-clock instant the window opened, unix milliseconds.
    pub window_opened_at: Timestamp,
}

// ============================================================================
// SECTION: Key Layout
// ============================================================================

/// Gate key claimed before a full device-address reload.
pub const FULL_RELOAD_GATE_KEY: &str = "devaddr-full-reload";
/// Gate key claimed before a delta device-address reload.
pub const DELTA_RELOAD_GATE_KEY: &str = "devaddr-delta-reload";
/// Gate key serializing full reloads across the fleet.
pub const GLOBAL_UPDATE_GATE_KEY: &str = "devaddr-global-update";
/// Key holding the last delta-reload high-water mark.
pub const DELTA_RELOAD_MARK_KEY: &str = "devaddr-delta-mark";

/// Returns the lease key guarding a device's records.
#[must_use]
pub fn device_lock_key(device_id: &DeviceId) -> String {
    format!("lock:{device_id}")
}

/// Returns the key of a device counter record.
#[must_use]
pub fn counter_key(device_id: &DeviceId) -> String {
    format!("counter:{device_id}")
}

/// Returns the key of a join validation record.
#[must_use]
pub fn join_key(device_id: &DeviceId) -> String {
    format!("join:{device_id}")
}

/// Returns the key of a join-nonce replay guard entry.
#[must_use]
pub fn nonce_key(device_id: &DeviceId, nonce: DevNonce) -> String {
    format!("nonce:{device_id}:{nonce}")
}

/// Returns the hash key of a device-address mapping.
#[must_use]
pub fn devaddr_key(addr: &DevAddr) -> String {
    format!("devaddr:{addr}")
}

/// Returns the lease key guarding a device-address cache fill.
#[must_use]
pub fn devaddr_lock_key(addr: &DevAddr) -> String {
    format!("devaddr-lock:{addr}")
}

/// Returns the list key of a device's ADR sample window.
#[must_use]
pub fn adr_window_key(device_id: &DeviceId) -> String {
    format!("adr:{device_id}")
}

/// Returns the key of a device's last ADR entry.
#[must_use]
pub fn adr_last_key(device_id: &DeviceId) -> String {
    format!("adr-last:{device_id}")
}

/// Returns the key of a device's preferred-gateway election state.
#[must_use]
pub fn preferred_gateway_key(device_id: &DeviceId) -> String {
    format!("pref-gw:{device_id}")
}

/// Returns the lease key guarding preferred-gateway state updates.
#[must_use]
pub fn preferred_gateway_lock_key(device_id: &DeviceId) -> String {
    format!("pref-gw-lock:{device_id}")
}
