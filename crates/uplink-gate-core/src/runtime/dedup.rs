// crates/uplink-gate-core/src/runtime/dedup.rs
// ============================================================================
// Module: Duplicate Arbiter
// Description: Single-winner election among concurrent reports of one uplink.
// Purpose: Ensure exactly one gateway per uplink is told it is not a duplicate.
// Dependencies: crate::core, crate::interfaces, crate::runtime::frame_counter, serde
// ============================================================================

//! ## Overview
//! Several gateways can hear and forward the same uplink. The duplicate
//! arbiter decides which report is the first sighting using the counter-
//! ordering rules of [`crate::runtime::frame_counter::decide`]: a new uplink
//! counter wins, a same-counter report from the owning gateway is a
//! legitimate retry, and everything else is a duplicate. Winning reports
//! persist their claim so later reports for the same counter lose.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::interfaces::AcquireMode;
use crate::interfaces::LeaseStore;
use crate::runtime::ArbiterError;
use crate::runtime::device_cache::CacheError;
use crate::runtime::device_cache::DeviceCache;
use crate::runtime::frame_counter::CounterVerdict;
use crate::runtime::frame_counter::decide;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Duplicate-check request for one observed uplink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCheckRequest {
    /// Device the uplink belongs to.
    pub device_id: DeviceId,
    /// Gateway reporting the uplink.
    pub gateway_id: GatewayId,
    /// Uplink counter of the observation.
    pub fcnt_up: u32,
    /// Downlink counter reported with the observation.
    pub fcnt_down: u32,
}

/// Duplicate-check verdict.
///
/// # Invariants
/// - For all concurrent checks sharing one device and uplink counter, exactly
///   one verdict carries `is_duplicate == false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateVerdict {
    /// True when another gateway already claimed this uplink.
    pub is_duplicate: bool,
    /// Gateway owning the uplink counter after the check.
    pub gateway_id: GatewayId,
}

// ============================================================================
// SECTION: Arbiter
// ============================================================================

/// Single-winner arbiter for concurrently-reported uplinks.
pub struct DuplicateArbiter {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
}

impl DuplicateArbiter {
    /// Creates an arbiter over the shared store.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
        }
    }

    /// Decides whether this observation is the first sighting of its uplink.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::LeaseTimeout`] when the device lease is not
    /// granted within the retry bound, or cache/store errors.
    pub fn check(&self, request: &DuplicateCheckRequest) -> Result<DuplicateVerdict, ArbiterError> {
        let mut cache = DeviceCache::new(
            Arc::clone(&self.store),
            request.device_id.clone(),
            request.gateway_id.as_str(),
        );
        if !cache.try_lock(AcquireMode::Block)? {
            return Err(ArbiterError::LeaseTimeout(request.device_id.clone()));
        }
        let verdict = execute(&cache, request)?;
        cache.unlock()?;
        Ok(verdict)
    }
}

/// Runs the duplicate check against a locked cache.
///
/// Winning reports persist their claim (uplink counter and owner) without
/// consuming a downlink counter; the bundler folds the downlink computation
/// into the same lease scope when a confirmation is also requested.
pub(crate) fn execute(
    cache: &DeviceCache,
    request: &DuplicateCheckRequest,
) -> Result<DuplicateVerdict, CacheError> {
    let cached = cache.try_get_info()?;
    let decision = decide(
        cached.as_ref(),
        &request.gateway_id,
        request.fcnt_up,
        request.fcnt_down,
    );
    match decision.verdict {
        CounterVerdict::NewUplink | CounterVerdict::Retry => {
            if let Some(record) = &decision.claimed {
                cache.store_info(record)?;
            }
            Ok(DuplicateVerdict {
                is_duplicate: false,
                gateway_id: request.gateway_id.clone(),
            })
        }
        CounterVerdict::Duplicate => {
            let owner = cached
                .map_or_else(|| request.gateway_id.clone(), |record| record.gateway_id);
            Ok(DuplicateVerdict {
                is_duplicate: true,
                gateway_id: owner,
            })
        }
    }
}
