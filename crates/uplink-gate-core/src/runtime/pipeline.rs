// crates/uplink-gate-core/src/runtime/pipeline.rs
// ============================================================================
// Module: Bundler Pipeline
// Description: Fixed-order arbiter composition for one inbound request.
// Purpose: Run a requested subset of arbiters under one device lease.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde, thiserror
// ============================================================================

//! ## Overview
//! A bundled request names the operations it wants via a bitmask; the
//! pipeline acquires the device lease once, runs the statically-typed item
//! list in a fixed order (cache-reset, deduplication, ADR, frame-counter,
//! preferred-gateway), and aggregates one reply with an optional field per
//! requested operation. Ordering matters: deduplication's outcome gates
//! confirmation for the later items, and ADR and frame-counter share one
//! downlink-counter advance through the context so a bundle never consumes
//! two. Per-item failures are recovered into the reply's error field; only
//! lease misuse propagates as a fault.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::records::DeviceCounterRecord;
use crate::interfaces::AcquireMode;
use crate::interfaces::LeaseStore;
use crate::interfaces::StoreError;
use crate::runtime::ArbiterError;
use crate::runtime::adr::AdrEngine;
use crate::runtime::adr::AdrReply;
use crate::runtime::adr::AdrRequest;
use crate::runtime::dedup::DuplicateVerdict;
use crate::runtime::device_cache::CacheError;
use crate::runtime::device_cache::DeviceCache;
use crate::runtime::frame_counter;
use crate::runtime::frame_counter::CounterDecision;
use crate::runtime::frame_counter::CounterVerdict;
use crate::runtime::frame_counter::decide;
use crate::runtime::preferred_gateway::PreferredGatewayArbiter;
use crate::runtime::preferred_gateway::PreferredGatewayReply;
use crate::runtime::preferred_gateway::PreferredGatewayRequest;
use crate::runtime::telemetry::ArbiterTelemetry;
use crate::runtime::telemetry::NoopTelemetry;
use crate::runtime::telemetry::OperationKind;
use crate::runtime::telemetry::OperationOutcome;

// ============================================================================
// SECTION: Operations Bitmask
// ============================================================================

/// Bitmask of operations requested in one bundle.
///
/// # Invariants
/// - Unknown bits are preserved but never executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operations(u8);

impl Operations {
    /// Duplicate-uplink check.
    pub const DEDUP: Self = Self(0b0000_0001);
    /// ADR tracking and decision.
    pub const ADR: Self = Self(0b0000_0010);
    /// Frame-counter arbitration.
    pub const FRAME_COUNTER: Self = Self(0b0000_0100);
    /// Preferred-gateway election.
    pub const PREFERRED_GATEWAY: Self = Self(0b0000_1000);
    /// Guarded cache reset before arbitration.
    pub const CACHE_RESET: Self = Self(0b0001_0000);

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a mask from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Returns true when every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of both masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true when no operation is requested.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Bundled arbitration request.
///
/// Optional payload fields must be present for the operations that consume
/// them: `snr`, `data_rate`, and `required_tx_power` for ADR, `rssi` for the
/// preferred-gateway election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundlerRequest {
    /// Device the uplink belongs to.
    pub device_id: DeviceId,
    /// Gateway reporting the uplink.
    pub gateway_id: GatewayId,
    /// Requested operations.
    pub operations: Operations,
    /// Uplink counter reported by the client.
    pub client_fcnt_up: u32,
    /// Downlink counter reported by the client.
    pub client_fcnt_down: u32,
    /// Signal-to-noise ratio, required for ADR.
    #[serde(default)]
    pub snr: Option<f64>,
    /// Data rate of the uplink, required for ADR.
    #[serde(default)]
    pub data_rate: Option<u8>,
    /// Highest supported transmit-power index, required for ADR.
    #[serde(default)]
    pub required_tx_power: Option<u8>,
    /// RSSI of the uplink, required for the preferred-gateway election.
    #[serde(default)]
    pub rssi: Option<f64>,
}

/// Aggregated bundle reply with one optional field per requested operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BundlerReply {
    /// Duplicate-check verdict, when requested.
    pub dedup: Option<DuplicateVerdict>,
    /// ADR reply, when requested.
    pub adr: Option<AdrReply>,
    /// Next downlink counter, when frame-counter arbitration was requested.
    pub next_fcnt_down: Option<u32>,
    /// Preferred-gateway reply, when requested.
    pub preferred_gateway: Option<PreferredGatewayReply>,
    /// First recovered per-item error, when any item failed.
    pub error_message: Option<String>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Pipeline faults surfaced to the caller.
///
/// # Invariants
/// - Recoverable per-item failures never appear here; they land in
///   [`BundlerReply::error_message`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request named no operations.
    #[error("bundle requested no operations")]
    EmptyOperations,
    /// The request is missing a payload its operations need.
    #[error("invalid bundle request: {0}")]
    InvalidRequest(String),
    /// The device lease was not acquired within the retry bound.
    #[error("device {0}: lease not acquired within the retry bound")]
    LeaseTimeout(DeviceId),
    /// A calling arbiter accessed state without the lease; caller defect.
    #[error(transparent)]
    Misuse(ArbiterError),
    /// The lease store failed while entering or leaving the bundle.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Shared state the items read and update while the device lease is held.
pub struct BundlerContext<'a> {
    /// Bundled request.
    request: &'a BundlerRequest,
    /// Locked device cache.
    cache: &'a DeviceCache,
    /// Counter decision, computed once per bundle.
    decision: Option<CounterDecision>,
    /// False once deduplication declared this report a loser.
    winner: bool,
    /// Downlink counter consumed by an earlier item, shared with later ones.
    consumed_down: Option<u32>,
    /// Record to persist when the bundle flushes.
    pending: Option<DeviceCounterRecord>,
    /// Aggregated reply under construction.
    reply: BundlerReply,
}

impl BundlerContext<'_> {
    /// Returns the counter decision, computing it on first use.
    ///
    /// The decision is evaluated once against the pre-bundle record so every
    /// item sees the same verdict regardless of execution order.
    fn decision(&mut self) -> Result<&CounterDecision, CacheError> {
        if self.decision.is_none() {
            let cached = self.cache.try_get_info()?;
            self.decision = Some(decide(
                cached.as_ref(),
                &self.request.gateway_id,
                self.request.client_fcnt_up,
                self.request.client_fcnt_down,
            ));
        }
        // The option was just filled; map the borrow back out.
        self.decision
            .as_ref()
            .ok_or_else(|| CacheError::Codec("counter decision missing".to_string()))
    }

    /// Consumes the bundle's single downlink-counter advance.
    ///
    /// Returns 0 without persisting when the report lost arbitration.
    fn consume_down(&mut self) -> Result<u32, CacheError> {
        if let Some(consumed) = self.consumed_down {
            return Ok(consumed);
        }
        if !self.winner {
            return Ok(0);
        }
        let decision = self.decision()?.clone();
        if decision.verdict == CounterVerdict::Duplicate {
            return Ok(0);
        }
        if let Some(record) = decision.advanced() {
            self.pending = Some(record);
        }
        self.consumed_down = Some(decision.next_fcnt_down);
        Ok(decision.next_fcnt_down)
    }
}

// ============================================================================
// SECTION: Execution Items
// ============================================================================

/// Flow-control state returned by a pipeline item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    /// Continue with the next requested item.
    Continue,
    /// The bundle is complete; skip the remaining items.
    Done,
}

/// One statically-typed pipeline step behind the common contract.
pub trait ExecutionItem: Send + Sync {
    /// Returns the operation bit this item serves.
    fn operation(&self) -> Operations;

    /// Returns the telemetry label for this item.
    fn kind(&self) -> OperationKind;

    /// Executes the item against the shared context.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError`]; the pipeline recovers everything except
    /// lease misuse into the reply.
    fn execute(&self, ctx: &mut BundlerContext<'_>) -> Result<ExecutionState, ArbiterError>;
}

/// Guarded cache reset, first in the fixed order.
struct CacheResetItem;

impl ExecutionItem for CacheResetItem {
    fn operation(&self) -> Operations {
        Operations::CACHE_RESET
    }

    fn kind(&self) -> OperationKind {
        OperationKind::CacheReset
    }

    fn execute(&self, ctx: &mut BundlerContext<'_>) -> Result<ExecutionState, ArbiterError> {
        frame_counter::apply_guarded_reset(ctx.cache)?;
        Ok(ExecutionState::Continue)
    }
}

/// Duplicate-uplink check; its verdict gates later confirmations.
struct DedupItem;

impl ExecutionItem for DedupItem {
    fn operation(&self) -> Operations {
        Operations::DEDUP
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Dedup
    }

    fn execute(&self, ctx: &mut BundlerContext<'_>) -> Result<ExecutionState, ArbiterError> {
        let decision = ctx.decision()?.clone();
        match decision.verdict {
            CounterVerdict::NewUplink | CounterVerdict::Retry => {
                if ctx.pending.is_none() {
                    ctx.pending = decision.claimed;
                }
                ctx.reply.dedup = Some(DuplicateVerdict {
                    is_duplicate: false,
                    gateway_id: ctx.request.gateway_id.clone(),
                });
            }
            CounterVerdict::Duplicate => {
                ctx.winner = false;
                let owner = ctx
                    .cache
                    .try_get_info()?
                    .map_or_else(|| ctx.request.gateway_id.clone(), |record| record.gateway_id);
                ctx.reply.dedup = Some(DuplicateVerdict {
                    is_duplicate: true,
                    gateway_id: owner,
                });
            }
        }
        Ok(ExecutionState::Continue)
    }
}

/// ADR tracking and decision; consumes the shared counter advance when it
/// confirms.
struct AdrItem {
    /// Shared ADR engine.
    engine: Arc<AdrEngine>,
}

impl ExecutionItem for AdrItem {
    fn operation(&self) -> Operations {
        Operations::ADR
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Adr
    }

    fn execute(&self, ctx: &mut BundlerContext<'_>) -> Result<ExecutionState, ArbiterError> {
        let request = adr_request(ctx.request)?;
        let outcome = self.engine.track(&request)?;
        let reply = if ctx.winner && self.engine.ready_to_confirm(&request, &outcome) {
            match self.engine.compute(&request, &outcome.window) {
                Ok(decision) => {
                    let next = ctx.consume_down()?;
                    self.engine.confirmed(&outcome, decision, next)
                }
                Err(_) => AdrReply::not_ready(outcome.window.len()),
            }
        } else {
            AdrReply::not_ready(outcome.window.len())
        };
        ctx.reply.adr = Some(reply);
        Ok(ExecutionState::Continue)
    }
}

/// Frame-counter arbitration; reuses an advance already consumed by ADR.
struct FrameCounterItem;

impl ExecutionItem for FrameCounterItem {
    fn operation(&self) -> Operations {
        Operations::FRAME_COUNTER
    }

    fn kind(&self) -> OperationKind {
        OperationKind::FrameCounter
    }

    fn execute(&self, ctx: &mut BundlerContext<'_>) -> Result<ExecutionState, ArbiterError> {
        let next = ctx.consume_down()?;
        ctx.reply.next_fcnt_down = Some(next);
        Ok(ExecutionState::Continue)
    }
}

/// Preferred-gateway election, last in the fixed order because it rides out
/// its collection window.
struct PreferredGatewayItem {
    /// Shared election arbiter.
    arbiter: Arc<PreferredGatewayArbiter>,
}

impl ExecutionItem for PreferredGatewayItem {
    fn operation(&self) -> Operations {
        Operations::PREFERRED_GATEWAY
    }

    fn kind(&self) -> OperationKind {
        OperationKind::PreferredGateway
    }

    fn execute(&self, ctx: &mut BundlerContext<'_>) -> Result<ExecutionState, ArbiterError> {
        let rssi = ctx
            .request
            .rssi
            .ok_or_else(|| ArbiterError::Codec("rssi missing".to_string()))?;
        let reply = self.arbiter.report(&PreferredGatewayRequest {
            device_id: ctx.request.device_id.clone(),
            gateway_id: ctx.request.gateway_id.clone(),
            rssi,
            fcnt_up: ctx.request.client_fcnt_up,
        })?;
        ctx.reply.preferred_gateway = Some(reply);
        Ok(ExecutionState::Done)
    }
}

/// Builds the ADR sub-request from the bundle payload.
fn adr_request(request: &BundlerRequest) -> Result<AdrRequest, ArbiterError> {
    let snr = request
        .snr
        .ok_or_else(|| ArbiterError::Codec("snr missing".to_string()))?;
    let data_rate = request
        .data_rate
        .ok_or_else(|| ArbiterError::Codec("data rate missing".to_string()))?;
    let required_tx_power = request
        .required_tx_power
        .ok_or_else(|| ArbiterError::Codec("required tx power missing".to_string()))?;
    Ok(AdrRequest {
        device_id: request.device_id.clone(),
        gateway_id: request.gateway_id.clone(),
        snr,
        data_rate,
        required_tx_power,
        fcnt_up: request.client_fcnt_up,
        fcnt_down: request.client_fcnt_down,
    })
}

// ============================================================================
// SECTION: Bundler
// ============================================================================

/// Fixed-order arbiter composition for bundled requests.
pub struct Bundler {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
    /// Pipeline items in execution order.
    items: Vec<Box<dyn ExecutionItem>>,
    /// Telemetry sink for per-item outcomes.
    telemetry: Arc<dyn ArbiterTelemetry>,
}

impl Bundler {
    /// Creates a bundler with the fixed item order and no-op telemetry.
    #[must_use]
    pub fn new(
        store: Arc<dyn LeaseStore>,
        adr_engine: Arc<AdrEngine>,
        preferred_gateway: Arc<PreferredGatewayArbiter>,
    ) -> Self {
        Self::with_telemetry(store, adr_engine, preferred_gateway, Arc::new(NoopTelemetry))
    }

    /// Creates a bundler with an explicit telemetry sink.
    #[must_use]
    pub fn with_telemetry(
        store: Arc<dyn LeaseStore>,
        adr_engine: Arc<AdrEngine>,
        preferred_gateway: Arc<PreferredGatewayArbiter>,
        telemetry: Arc<dyn ArbiterTelemetry>,
    ) -> Self {
        let items: Vec<Box<dyn ExecutionItem>> = vec![
            Box::new(CacheResetItem),
            Box::new(DedupItem),
            Box::new(AdrItem {
                engine: adr_engine,
            }),
            Box::new(FrameCounterItem),
            Box::new(PreferredGatewayItem {
                arbiter: preferred_gateway,
            }),
        ];
        Self {
            store,
            items,
            telemetry,
        }
    }

    /// Handles one bundled request under a single device lease.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for empty bundles, lease timeouts, store
    /// failures at the bundle boundary, and lease misuse. Per-item failures
    /// are recovered into [`BundlerReply::error_message`].
    pub fn handle(&self, request: &BundlerRequest) -> Result<BundlerReply, PipelineError> {
        if request.operations.is_empty() {
            return Err(PipelineError::EmptyOperations);
        }
        validate_payloads(request)?;
        let mut cache = DeviceCache::new(
            Arc::clone(&self.store),
            request.device_id.clone(),
            request.gateway_id.as_str(),
        );
        let locked = cache
            .try_lock(AcquireMode::Block)
            .map_err(|err| PipelineError::Store(store_error(err)))?;
        if !locked {
            return Err(PipelineError::LeaseTimeout(request.device_id.clone()));
        }
        let mut ctx = BundlerContext {
            request,
            cache: &cache,
            decision: None,
            winner: true,
            consumed_down: None,
            pending: None,
            reply: BundlerReply::default(),
        };
        for item in &self.items {
            if !request.operations.contains(item.operation()) {
                continue;
            }
            let started = Instant::now();
            match item.execute(&mut ctx) {
                Ok(ExecutionState::Continue) => {
                    self.telemetry.record_operation(
                        item.kind(),
                        OperationOutcome::Ok,
                        started.elapsed(),
                    );
                }
                Ok(ExecutionState::Done) => {
                    self.telemetry.record_operation(
                        item.kind(),
                        OperationOutcome::Ok,
                        started.elapsed(),
                    );
                    break;
                }
                Err(err) if err.is_misuse() => {
                    return Err(PipelineError::Misuse(err));
                }
                Err(err) => {
                    self.telemetry.record_operation(
                        item.kind(),
                        OperationOutcome::Recovered,
                        started.elapsed(),
                    );
                    if ctx.reply.error_message.is_none() {
                        ctx.reply.error_message = Some(err.to_string());
                    }
                }
            }
        }
        let reply = flush(&cache, ctx)?;
        cache.unlock().map_err(|err| PipelineError::Store(store_error(err)))?;
        Ok(reply)
    }
}

/// Persists the pending record and returns the aggregated reply.
fn flush(cache: &DeviceCache, ctx: BundlerContext<'_>) -> Result<BundlerReply, PipelineError> {
    let mut reply = ctx.reply;
    if let Some(record) = &ctx.pending
        && let Err(err) = cache.store_info(record)
    {
        match err {
            CacheError::LeaseViolation(_) => {
                return Err(PipelineError::Misuse(ArbiterError::Cache(err)));
            }
            other => {
                if reply.error_message.is_none() {
                    reply.error_message = Some(other.to_string());
                }
            }
        }
    }
    Ok(reply)
}

/// Checks that the request carries the payloads its operations need.
fn validate_payloads(request: &BundlerRequest) -> Result<(), PipelineError> {
    if request.operations.contains(Operations::ADR)
        && (request.snr.is_none()
            || request.data_rate.is_none()
            || request.required_tx_power.is_none())
    {
        return Err(PipelineError::InvalidRequest(
            "adr requires snr, data_rate, and required_tx_power".to_string(),
        ));
    }
    if request.operations.contains(Operations::PREFERRED_GATEWAY) && request.rssi.is_none() {
        return Err(PipelineError::InvalidRequest(
            "preferred-gateway requires rssi".to_string(),
        ));
    }
    Ok(())
}

/// Maps a cache error on the bundle boundary into a store error.
fn store_error(err: CacheError) -> StoreError {
    match err {
        CacheError::Store(inner) => inner,
        other => StoreError::Backend(other.to_string()),
    }
}
