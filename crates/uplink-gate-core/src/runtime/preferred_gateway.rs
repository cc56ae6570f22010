// crates/uplink-gate-core/src/runtime/preferred_gateway.rs
// ============================================================================
// Module: Preferred-Gateway Arbiter
// Description: Best-reception gateway election over a short rolling window.
// Purpose: Pick one confirming gateway per uplink counter and flag stragglers.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde
// ============================================================================

//! ## Overview
//! Each gateway hearing an uplink reports its RSSI for the device's current
//! uplink counter. The arbiter keeps one election state per device: the
//! highest counter seen so far and the best RSSI observed for it. Reporters
//! within the window collect into the election and then ride it out, so every
//! collector receives the same resolved winner. A report with a counter below
//! the current one is answered immediately with the existing winner and a
//! conflict flag; a report with a larger counter discards the election and
//! opens a fresh window. Ties break first-seen: only a strictly better RSSI
//! displaces the winner.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::records::PREFERRED_GATEWAY_WINDOW;
use crate::core::records::PreferredGatewayState;
use crate::core::records::preferred_gateway_key;
use crate::core::records::preferred_gateway_lock_key;
use crate::core::time::Timestamp;
use crate::interfaces::AcquireMode;
use crate::interfaces::LeaseStore;
use crate::runtime::ArbiterError;
use crate::runtime::device_cache::DeviceLease;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lease TTL for election state updates; updates are sub-millisecond.
const ELECTION_LOCK_TTL: Duration = Duration::from_secs(1);
/// Lifetime of election state past its window, for stale-conflict answers.
const ELECTION_STATE_TTL: Duration = Duration::from_secs(30);

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Preferred-gateway report for one observed uplink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferredGatewayRequest {
    /// Device the uplink belongs to.
    pub device_id: DeviceId,
    /// Gateway reporting the uplink.
    pub gateway_id: GatewayId,
    /// RSSI observed by the reporting gateway.
    pub rssi: f64,
    /// Uplink counter of the observation.
    pub fcnt_up: u32,
}

/// Preferred-gateway reply.
///
/// # Invariants
/// - `conflict` is true when the request's counter lost to a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredGatewayReply {
    /// Gateway elected for the current uplink counter.
    pub preferred_gateway_id: GatewayId,
    /// Uplink counter the request carried.
    pub request_fcnt_up: u32,
    /// Uplink counter the election tracks.
    pub current_fcnt_up: u32,
    /// True when the request's counter is stale for this election.
    pub conflict: bool,
    /// Present when the election state was lost mid-window.
    pub error_message: Option<String>,
}

// ============================================================================
// SECTION: Arbiter
// ============================================================================

/// Best-reception gateway election over a short rolling window.
pub struct PreferredGatewayArbiter {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
    /// Collection window length.
    window: Duration,
}

impl PreferredGatewayArbiter {
    /// Creates an arbiter with the default window.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self::with_window(store, PREFERRED_GATEWAY_WINDOW)
    }

    /// Creates an arbiter with an explicit window length.
    #[must_use]
    pub const fn with_window(store: Arc<dyn LeaseStore>, window: Duration) -> Self {
        Self {
            store,
            window,
        }
    }

    /// Reports one observation and rides the window to the resolved winner.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::LeaseTimeout`] when the election lock is not
    /// granted within the retry bound, or store/codec errors.
    pub fn report(
        &self,
        request: &PreferredGatewayRequest,
    ) -> Result<PreferredGatewayReply, ArbiterError> {
        match self.collect(request)? {
            CollectOutcome::StaleConflict(state) => Ok(PreferredGatewayReply {
                preferred_gateway_id: state.best_gateway_id,
                request_fcnt_up: request.fcnt_up,
                current_fcnt_up: state.current_fcnt_up,
                conflict: true,
                error_message: None,
            }),
            CollectOutcome::Collecting(state) => {
                self.ride_window(&state);
                self.resolve(request)
            }
        }
    }

    /// Returns the current winner without waiting for the window.
    ///
    /// Used for forced re-checks; normal reporters ride the window.
    ///
    /// # Errors
    ///
    /// Returns store/codec errors.
    pub fn resolve_now(
        &self,
        device_id: &DeviceId,
    ) -> Result<Option<(GatewayId, u32)>, ArbiterError> {
        let state = self.load_state(device_id)?;
        Ok(state.map(|state| (state.best_gateway_id, state.current_fcnt_up)))
    }

    /// Folds the report into the device's election under the short lock.
    fn collect(
        &self,
        request: &PreferredGatewayRequest,
    ) -> Result<CollectOutcome, ArbiterError> {
        let lock = DeviceLease::acquire(
            Arc::clone(&self.store),
            preferred_gateway_lock_key(&request.device_id),
            request.gateway_id.as_str(),
            ELECTION_LOCK_TTL,
            AcquireMode::Block,
        )?
        .ok_or_else(|| ArbiterError::LeaseTimeout(request.device_id.clone()))?;
        let current = self.load_state(&request.device_id)?;
        let outcome = match current {
            Some(state) if request.fcnt_up < state.current_fcnt_up => {
                CollectOutcome::StaleConflict(state)
            }
            Some(mut state) if request.fcnt_up == state.current_fcnt_up => {
                if request.rssi > state.best_rssi {
                    state.best_rssi = request.rssi;
                    state.best_gateway_id = request.gateway_id.clone();
                    self.store_state(&request.device_id, &state)?;
                }
                CollectOutcome::Collecting(state)
            }
            _ => {
                let state = PreferredGatewayState {
                    current_fcnt_up: request.fcnt_up,
                    best_gateway_id: request.gateway_id.clone(),
                    best_rssi: request.rssi,
                    window_opened_at: Timestamp::from_unix_millis(unix_millis()),
                };
                self.store_state(&request.device_id, &state)?;
                CollectOutcome::Collecting(state)
            }
        };
        drop(lock);
        Ok(outcome)
    }

    /// Sleeps out whatever remains of the election window.
    fn ride_window(&self, state: &PreferredGatewayState) {
        let window_ms = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        let deadline = state.window_opened_at.saturating_add_millis(window_ms);
        let remaining = deadline.as_unix_millis() - unix_millis();
        if remaining > 0 {
            let remaining = u64::try_from(remaining).unwrap_or(0);
            thread::sleep(Duration::from_millis(remaining));
        }
    }

    /// Reads the election after the window and shapes the reply.
    fn resolve(
        &self,
        request: &PreferredGatewayRequest,
    ) -> Result<PreferredGatewayReply, ArbiterError> {
        match self.load_state(&request.device_id)? {
            Some(state) => Ok(PreferredGatewayReply {
                conflict: state.current_fcnt_up > request.fcnt_up,
                preferred_gateway_id: state.best_gateway_id,
                request_fcnt_up: request.fcnt_up,
                current_fcnt_up: state.current_fcnt_up,
                error_message: None,
            }),
            None => Ok(PreferredGatewayReply {
                preferred_gateway_id: request.gateway_id.clone(),
                request_fcnt_up: request.fcnt_up,
                current_fcnt_up: request.fcnt_up,
                conflict: false,
                error_message: Some("election state expired mid-window".to_string()),
            }),
        }
    }

    /// Loads the election state for a device.
    fn load_state(
        &self,
        device_id: &DeviceId,
    ) -> Result<Option<PreferredGatewayState>, ArbiterError> {
        let Some(document) = self.store.get(&preferred_gateway_key(device_id))? else {
            return Ok(None);
        };
        let state = serde_json::from_str(&document)
            .map_err(|err| ArbiterError::Codec(err.to_string()))?;
        Ok(Some(state))
    }

    /// Persists the election state for a device.
    fn store_state(
        &self,
        device_id: &DeviceId,
        state: &PreferredGatewayState,
    ) -> Result<(), ArbiterError> {
        let document = serde_json::to_string(state)
            .map_err(|err| ArbiterError::Codec(err.to_string()))?;
        self.store.set(
            &preferred_gateway_key(device_id),
            &document,
            Some(ELECTION_STATE_TTL),
        )?;
        Ok(())
    }
}

/// Outcome of folding a report into the election.
enum CollectOutcome {
    /// The report joined the current window.
    Collecting(PreferredGatewayState),
    /// The report's counter is older than the election's.
    StaleConflict(PreferredGatewayState),
}

/// Returns the wall clock as unix milliseconds.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}
