// crates/uplink-gate-core/src/core/identifiers.rs
// ============================================================================
// Module: Uplink Gate Identifiers
// Description: Canonical opaque identifiers for devices, gateways, and joins.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout Uplink Gate.
//! Device and gateway identifiers are opaque strings that serialize
//! transparently on the wire. Device addresses are short, non-unique network
//! addresses and never substitute for a device identifier. Join nonces are
//! numeric one-time values scoped to a single device.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Permanent device identifier (device EUI).
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a new device identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DeviceId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Gateway identifier for a protocol gateway instance.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(String);

impl GatewayId {
    /// Creates a new gateway identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for GatewayId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for GatewayId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Short, non-unique device network address.
///
/// # Invariants
/// - Opaque UTF-8 string; distinct devices may share an address, so address
///   lookups always resolve through the device-address cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevAddr(String);

impl DevAddr {
    /// Creates a new device address.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DevAddr {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DevAddr {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// One-time join nonce scoped to a single device.
///
/// # Invariants
/// - A `(device, nonce)` pair is accepted at most once; enforcement lives in
///   the join handler's set-if-absent replay guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevNonce(u32);

impl DevNonce {
    /// Creates a new join nonce.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw nonce value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DevNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for DevNonce {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}
