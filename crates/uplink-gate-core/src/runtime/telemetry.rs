// crates/uplink-gate-core/src/runtime/telemetry.rs
// ============================================================================
// Module: Runtime Telemetry
// Description: Observability hooks for arbitration and synchronization.
// Purpose: Provide metric events and latency hooks without hard deps.
// Dependencies: std
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics interface for arbitration counters and
//! synchronizer outcomes. It is intentionally dependency-light so downstream
//! deployments can plug in Prometheus or OpenTelemetry without redesign.
//! Telemetry must avoid leaking identity secrets; labels carry classification
//! enums, never payloads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// SECTION: Metric Labels
// ============================================================================

/// Arbitration operation classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Duplicate-uplink check.
    Dedup,
    /// ADR tracking and decision.
    Adr,
    /// Frame-counter arbitration.
    FrameCounter,
    /// Preferred-gateway election.
    PreferredGateway,
    /// Guarded cache reset.
    CacheReset,
}

impl OperationKind {
    /// Returns a stable label for the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dedup => "dedup",
            Self::Adr => "adr",
            Self::FrameCounter => "frame_counter",
            Self::PreferredGateway => "preferred_gateway",
            Self::CacheReset => "cache_reset",
        }
    }
}

/// Arbitration outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationOutcome {
    /// The operation completed.
    Ok,
    /// The operation failed and was recovered at the pipeline boundary.
    Recovered,
}

/// Synchronizer reload classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadKind {
    /// Full registry reload.
    Full,
    /// Incremental reload since the last mark.
    Delta,
}

impl ReloadKind {
    /// Returns a stable label for the reload kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Delta => "delta",
        }
    }
}

/// Synchronizer reload outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The reload completed.
    Ok,
    /// The gate was held elsewhere; nothing ran.
    Skipped,
    /// The reload failed; the gate TTL was shortened for retry.
    Failed,
    /// The reload was cancelled by the caller's lifetime.
    Cancelled,
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Metrics sink for per-request arbitration.
pub trait ArbiterTelemetry: Send + Sync {
    /// Records one pipeline item execution.
    fn record_operation(
        &self,
        operation: OperationKind,
        outcome: OperationOutcome,
        latency: Duration,
    );
}

/// Metrics sink for background synchronization.
pub trait SyncTelemetry: Send + Sync {
    /// Records one reload attempt.
    fn record_reload(&self, kind: ReloadKind, outcome: ReloadOutcome, duration: Duration);

    /// Records one address lookup; `hit` is true on a cache hit.
    fn record_lookup(&self, hit: bool);
}

/// No-op telemetry sink.
///
/// # Invariants
/// - Events are intentionally discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl ArbiterTelemetry for NoopTelemetry {
    fn record_operation(
        &self,
        _operation: OperationKind,
        _outcome: OperationOutcome,
        _latency: Duration,
    ) {
    }
}

impl SyncTelemetry for NoopTelemetry {
    fn record_reload(&self, _kind: ReloadKind, _outcome: ReloadOutcome, _duration: Duration) {}

    fn record_lookup(&self, _hit: bool) {}
}
