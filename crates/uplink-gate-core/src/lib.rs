// crates/uplink-gate-core/src/lib.rs
// ============================================================================
// Module: Uplink Gate Core Library
// Description: Arbitration core between redundant gateways and the registry.
// Purpose: Expose the data model, collaborator interfaces, and the runtime.
// Dependencies: rand, serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! Uplink Gate produces one consistent answer per device — who owns it, what
//! the next downlink counter is, whether a report is a duplicate, which
//! gateway should confirm, and what rate the device should use next — even
//! though requests arrive concurrently, out of order, and from service
//! instances that do not otherwise coordinate. All coordination is mediated
//! by the [`LeaseStore`]; the registry and the gateway channels are abstract
//! collaborators wired in by the host.
//! Invariants:
//! - Stateful operations run under the device-scoped lease.
//! - Non-zero downlink counters are non-decreasing per device.
//! - Background synchronization never blocks request arbitration.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::identifiers::DevAddr;
pub use crate::core::identifiers::DevNonce;
pub use crate::core::identifiers::DeviceId;
pub use crate::core::identifiers::GatewayId;
pub use crate::core::records::ADR_WINDOW_CAPACITY;
pub use crate::core::records::AdrLastEntry;
pub use crate::core::records::AdrSample;
pub use crate::core::records::DEVICE_ADDRESS_TTL;
pub use crate::core::records::DEVICE_COUNTER_TTL;
pub use crate::core::records::DEVICE_LEASE_TTL;
pub use crate::core::records::DEV_NONCE_TTL;
pub use crate::core::records::DeviceAddressRecord;
pub use crate::core::records::DeviceCounterRecord;
pub use crate::core::records::JOIN_VALIDATION_TTL;
pub use crate::core::records::JoinValidationRecord;
pub use crate::core::records::PREFERRED_GATEWAY_WINDOW;
pub use crate::core::records::PreferredGatewayState;
pub use crate::core::time::Timestamp;
pub use crate::core::time::TimestampError;
pub use crate::interfaces::AcquireMode;
pub use crate::interfaces::BroadcastError;
pub use crate::interfaces::Broadcaster;
pub use crate::interfaces::CancelToken;
pub use crate::interfaces::DeviceIdentity;
pub use crate::interfaces::DeviceTwin;
pub use crate::interfaces::IdentityRegistry;
pub use crate::interfaces::InvocationReply;
pub use crate::interfaces::InvokeError;
pub use crate::interfaces::LeaseStore;
pub use crate::interfaces::MethodInvoker;
pub use crate::interfaces::RegistryError;
pub use crate::interfaces::StoreError;
pub use crate::interfaces::TwinFilter;
pub use crate::interfaces::TwinPage;
pub use crate::interfaces::TwinProperties;
