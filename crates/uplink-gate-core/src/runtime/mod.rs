// crates/uplink-gate-core/src/runtime/mod.rs
// ============================================================================
// Module: Uplink Gate Runtime
// Description: Arbiters, device cache, pipeline, and background synchronizer.
// Purpose: Implement per-request arbitration and background cache maintenance.
// Dependencies: crate::core, crate::interfaces, thiserror
// ============================================================================

//! ## Overview
//! The runtime composes the lease store and the identity registry into the
//! per-device arbiters and the bundler pipeline. Every stateful operation runs
//! under the device-scoped lease; lease TTLs trade strict mutual exclusion for
//! liveness, so every protected operation must complete well within the TTL.
//! Background synchronization is contained here as well and never affects
//! concurrently-running request arbitration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::identifiers::DeviceId;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod address_sync;
pub mod adr;
pub mod dedup;
pub mod device_cache;
pub mod frame_counter;
pub mod join;
pub mod memory_store;
pub mod notify;
pub mod pipeline;
pub mod preferred_gateway;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use address_sync::AddressSyncConfig;
pub use address_sync::DeviceAddressCache;
pub use address_sync::DeviceAddressSynchronizer;
pub use address_sync::SyncError;
pub use address_sync::SyncHandle;
pub use adr::AdrEngine;
pub use adr::AdrReply;
pub use adr::AdrRequest;
pub use adr::AdrStrategy;
pub use adr::AdrStrategyError;
pub use adr::MarginAdrStrategy;
pub use dedup::DuplicateArbiter;
pub use dedup::DuplicateCheckRequest;
pub use dedup::DuplicateVerdict;
pub use device_cache::CacheError;
pub use device_cache::DeviceCache;
pub use device_cache::DeviceLease;
pub use frame_counter::FrameCounterArbiter;
pub use frame_counter::FrameCounterReply;
pub use frame_counter::FrameCounterRequest;
pub use join::JoinHandler;
pub use join::JoinOutcome;
pub use join::JoinRefusal;
pub use join::JoinRequest;
pub use memory_store::InMemoryLeaseStore;
pub use notify::CacheResetNotifier;
pub use notify::CacheResetReport;
pub use pipeline::Bundler;
pub use pipeline::BundlerReply;
pub use pipeline::BundlerRequest;
pub use pipeline::Operations;
pub use pipeline::PipelineError;
pub use preferred_gateway::PreferredGatewayArbiter;
pub use preferred_gateway::PreferredGatewayReply;
pub use preferred_gateway::PreferredGatewayRequest;
pub use telemetry::ArbiterTelemetry;
pub use telemetry::NoopTelemetry;
pub use telemetry::SyncTelemetry;

// ============================================================================
// SECTION: Shared Arbiter Errors
// ============================================================================

/// Errors raised by per-request arbiters.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - [`CacheError::LeaseViolation`] wrapped here stays fatal; the pipeline
///   never recovers it into a response field.
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// The device lease was not acquired within the retry bound.
    #[error("device {0}: lease not acquired within the retry bound")]
    LeaseTimeout(DeviceId),
    /// Device cache access failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Lease store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A stored document failed to encode or decode.
    #[error("arbiter codec error: {0}")]
    Codec(String),
}

impl ArbiterError {
    /// Returns true when the error signals caller misuse rather than a
    /// runtime condition.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(self, Self::Cache(CacheError::LeaseViolation(_)))
    }
}
