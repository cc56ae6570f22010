// crates/uplink-gate-core/src/runtime/frame_counter.rs
// ============================================================================
// Module: Frame-Counter Arbiter
// Description: Down-counter arbitration across concurrently-reporting gateways.
// Purpose: Hand out one monotonic downlink counter per device fleet-wide.
// Dependencies: crate::core, crate::interfaces, crate::runtime::device_cache, serde
// ============================================================================

//! ## Overview
//! The frame-counter arbiter decides the next downlink counter for a device
//! given concurrently-reported uplink counters from possibly different
//! gateways. The counter-ordering rules live in the pure [`decide`] function
//! shared with the duplicate arbiter: a new uplink counter wins, a retried
//! delivery by the same first-reporting gateway advances, and anything else is
//! a late duplicate answered with 0 ("do not confirm downstream").
//! Invariants:
//! - Non-zero replies are non-decreasing per device across all callers.
//! - All persistence happens while the device lease is held.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::records::DeviceCounterRecord;
use crate::interfaces::AcquireMode;
use crate::interfaces::LeaseStore;
use crate::runtime::ArbiterError;
use crate::runtime::device_cache::CacheError;
use crate::runtime::device_cache::DeviceCache;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Frame-counter arbitration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounterRequest {
    /// Device the uplink belongs to.
    pub device_id: DeviceId,
    /// Gateway reporting the uplink.
    pub gateway_id: GatewayId,
    /// Uplink counter reported by the client.
    pub client_fcnt_up: u32,
    /// Downlink counter reported by the client.
    pub client_fcnt_down: u32,
    /// Explicit cache-reset flag; clears guarded state before arbitration.
    #[serde(default)]
    pub reset: bool,
}

/// Frame-counter arbitration reply.
///
/// # Invariants
/// - `next_fcnt_down == 0` means "do not confirm downstream".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounterReply {
    /// Next downlink counter, or 0 when this report lost arbitration.
    pub next_fcnt_down: u32,
}

// ============================================================================
// SECTION: Counter Decision
// ============================================================================

/// Classification of one counter report against the cached record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterVerdict {
    /// First sighting of a new uplink counter; the reporter claims ownership.
    NewUplink,
    /// Retried delivery by the gateway already owning the counter.
    Retry,
    /// Late report from a different gateway for an already-claimed counter.
    Duplicate,
}

/// Outcome of the pure counter-ordering rules.
///
/// # Invariants
/// - `claimed` is `None` exactly when the verdict is [`CounterVerdict::Duplicate`].
/// - `next_fcnt_down` is 0 exactly when the verdict is [`CounterVerdict::Duplicate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDecision {
    /// Verdict for the report.
    pub verdict: CounterVerdict,
    /// Downlink counter a confirming caller would hand out.
    pub next_fcnt_down: u32,
    /// Record with uplink counter and owner claimed, downlink untouched.
    pub claimed: Option<DeviceCounterRecord>,
}

impl CounterDecision {
    /// Returns the record with the downlink counter consumed.
    #[must_use]
    pub fn advanced(&self) -> Option<DeviceCounterRecord> {
        self.claimed.as_ref().map(|record| DeviceCounterRecord {
            fcnt_down: self.next_fcnt_down,
            ..record.clone()
        })
    }
}

/// Applies the counter-ordering rules to one report.
///
/// The rules, in order:
/// 1. no record: initialize with the client counters, owner = reporter;
/// 2. `client_fcnt_up` greater than cached: new uplink, the reporter claims
///    ownership and the next downlink is `max(client, cached) + 1`;
/// 3. equal counter and same owner: legitimate retry, cached downlink + 1;
/// 4. anything else: duplicate, downlink withheld.
#[must_use]
pub fn decide(
    cached: Option<&DeviceCounterRecord>,
    gateway_id: &GatewayId,
    client_fcnt_up: u32,
    client_fcnt_down: u32,
) -> CounterDecision {
    match cached {
        None => {
            let claimed = DeviceCounterRecord {
                fcnt_up: client_fcnt_up,
                fcnt_down: client_fcnt_down,
                gateway_id: gateway_id.clone(),
            };
            CounterDecision {
                verdict: CounterVerdict::NewUplink,
                next_fcnt_down: client_fcnt_down.saturating_add(1),
                claimed: Some(claimed),
            }
        }
        Some(record) if client_fcnt_up > record.fcnt_up => {
            let base = client_fcnt_down.max(record.fcnt_down);
            let claimed = DeviceCounterRecord {
                fcnt_up: client_fcnt_up,
                fcnt_down: base,
                gateway_id: gateway_id.clone(),
            };
            CounterDecision {
                verdict: CounterVerdict::NewUplink,
                next_fcnt_down: base.saturating_add(1),
                claimed: Some(claimed),
            }
        }
        Some(record)
            if client_fcnt_up == record.fcnt_up && *gateway_id == record.gateway_id =>
        {
            CounterDecision {
                verdict: CounterVerdict::Retry,
                next_fcnt_down: record.fcnt_down.saturating_add(1),
                claimed: Some(record.clone()),
            }
        }
        Some(_) => CounterDecision {
            verdict: CounterVerdict::Duplicate,
            next_fcnt_down: 0,
            claimed: None,
        },
    }
}

// ============================================================================
// SECTION: Arbiter
// ============================================================================

/// Per-device downlink counter arbiter.
pub struct FrameCounterArbiter {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
}

impl FrameCounterArbiter {
    /// Creates an arbiter over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
        }
    }

    /// Arbitrates the next downlink counter for one report.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::LeaseTimeout`] when the device lease is not
    /// granted within the retry bound, or cache/store errors.
    pub fn next_fcnt_down(
        &self,
        request: &FrameCounterRequest,
    ) -> Result<FrameCounterReply, ArbiterError> {
        let mut cache = DeviceCache::new(
            Arc::clone(&self.store),
            request.device_id.clone(),
            request.gateway_id.as_str(),
        );
        if !cache.try_lock(AcquireMode::Block)? {
            return Err(ArbiterError::LeaseTimeout(request.device_id.clone()));
        }
        let next = execute(&cache, request)?;
        cache.unlock()?;
        Ok(FrameCounterReply {
            next_fcnt_down: next,
        })
    }
}

/// Runs the frame-counter algorithm against a locked cache.
///
/// Shared with the bundler pipeline so a bundle spends one lease round-trip.
pub(crate) fn execute(
    cache: &DeviceCache,
    request: &FrameCounterRequest,
) -> Result<u32, CacheError> {
    if request.reset {
        apply_guarded_reset(cache)?;
    }
    let cached = cache.try_get_info()?;
    let decision = decide(
        cached.as_ref(),
        &request.gateway_id,
        request.client_fcnt_up,
        request.client_fcnt_down,
    );
    if let Some(record) = decision.advanced() {
        cache.store_info(&record)?;
    }
    Ok(decision.next_fcnt_down)
}

/// Clears the counter record unless a racing gateway just initialized it.
///
/// A cached uplink counter of 0 or 1 is fresh session state that a gateway
/// may have written while the reset request was in flight; discarding it
/// would lose that gateway's claim.
pub(crate) fn apply_guarded_reset(cache: &DeviceCache) -> Result<(), CacheError> {
    if let Some(record) = cache.try_get_info()?
        && record.fcnt_up > 1
    {
        cache.clear_cache()?;
    }
    Ok(())
}
