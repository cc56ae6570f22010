// crates/uplink-gate-core/src/runtime/adr.rs
// ============================================================================
// Module: ADR Engine
// Description: Bounded signal-history windowing and adaptive-rate decisions.
// Purpose: Recommend data rate, power, and repetition from recent uplinks.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde, serde_json
// ============================================================================

//! ## Overview
//! The ADR engine keeps a bounded per-device window of recent signal samples
//! plus a last entry tracking how many gateways reported the current uplink
//! counter and which of them had the best SNR. Once the window holds the
//! capture threshold and the calling gateway is the recorded winner, the
//! configured [`AdrStrategy`] computes a recommendation; in every other case
//! the engine answers without confirming and without consuming a downlink
//! counter. The strategy is an explicit value passed to the constructor, so
//! region-specific algorithms substitute without touching the windowing.
//! Strategy failures are treated as "not enough information yet".

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::records::ADR_WINDOW_CAPACITY;
use crate::core::records::AdrLastEntry;
use crate::core::records::AdrSample;
use crate::core::records::DEVICE_COUNTER_TTL;
use crate::core::records::adr_last_key;
use crate::core::records::adr_window_key;
use crate::interfaces::AcquireMode;
use crate::interfaces::LeaseStore;
use crate::runtime::ArbiterError;
use crate::runtime::device_cache::DeviceCache;
use crate::runtime::frame_counter;
use crate::runtime::frame_counter::FrameCounterRequest;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// ADR request for one observed uplink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdrRequest {
    /// Device the uplink belongs to.
    pub device_id: DeviceId,
    /// Gateway reporting the uplink.
    pub gateway_id: GatewayId,
    /// Signal-to-noise ratio observed by the reporting gateway.
    pub snr: f64,
    /// Data rate the device used for the uplink.
    pub data_rate: u8,
    /// Highest transmit-power index the device supports.
    pub required_tx_power: u8,
    /// Uplink counter of the observation.
    pub fcnt_up: u32,
    /// Downlink counter reported with the observation.
    pub fcnt_down: u32,
}

/// ADR reply.
///
/// # Invariants
/// - Recommendation fields are present exactly when `can_confirm_to_device`
///   is true; a non-confirming reply never advances the downlink counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdrReply {
    /// True when the caller may confirm the recommendation to the device.
    pub can_confirm_to_device: bool,
    /// Recommended data rate.
    pub data_rate: Option<u8>,
    /// Recommended transmit-power index.
    pub tx_power: Option<u8>,
    /// Recommended repetition count.
    pub nb_repetition: Option<u8>,
    /// Downlink counter consumed for the confirmation.
    pub fcnt_down: Option<u32>,
    /// Number of samples currently in the window.
    pub number_of_frames: usize,
}

impl AdrReply {
    /// Returns the non-confirming reply for the given window size.
    #[must_use]
    pub const fn not_ready(number_of_frames: usize) -> Self {
        Self {
            can_confirm_to_device: false,
            data_rate: None,
            tx_power: None,
            nb_repetition: None,
            fcnt_down: None,
            number_of_frames,
        }
    }
}

// ============================================================================
// SECTION: Strategy
// ============================================================================

/// ADR strategy errors.
///
/// # Invariants
/// - The engine maps every variant to a non-confirming reply.
#[derive(Debug, Error)]
pub enum AdrStrategyError {
    /// The window does not contain enough usable samples.
    #[error("adr window not usable: {0}")]
    WindowNotUsable(String),
    /// The reported data rate is outside the strategy's table.
    #[error("unsupported data rate: {0}")]
    UnsupportedDataRate(u8),
}

/// Recommendation produced by an ADR strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdrDecision {
    /// Recommended data rate.
    pub data_rate: u8,
    /// Recommended transmit-power index.
    pub tx_power: u8,
    /// Recommended repetition count.
    pub nb_repetition: u8,
}

/// Computes transmission recommendations from a sample window.
pub trait AdrStrategy: Send + Sync {
    /// Computes a recommendation for the request given the current window.
    ///
    /// # Errors
    ///
    /// Returns [`AdrStrategyError`] when the window cannot support a
    /// decision; the engine answers non-confirming in that case.
    fn compute(
        &self,
        request: &AdrRequest,
        window: &[AdrSample],
    ) -> Result<AdrDecision, AdrStrategyError>;
}

/// Required demodulation-floor SNR per data rate, dB.
const REQUIRED_SNR_DB: [f64; 6] = [-20.0, -17.5, -15.0, -12.5, -10.0, -7.5];
/// Installation margin subtracted from the observed maximum SNR, dB.
const INSTALLATION_MARGIN_DB: f64 = 5.0;
/// Margin consumed per adaptation step, dB.
const STEP_MARGIN_DB: f64 = 2.5;
/// Highest data rate the default strategy recommends.
const MAX_DATA_RATE: u8 = 5;

/// Default margin-based strategy.
///
/// The available margin is the window's best SNR minus the demodulation floor
/// of the current data rate minus the installation margin. Each whole step of
/// margin first raises the data rate, then lowers transmit power; a negative
/// margin raises power back toward index 0. Repetition follows the observed
/// delivery ratio over the window's counter span.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarginAdrStrategy;

impl AdrStrategy for MarginAdrStrategy {
    fn compute(
        &self,
        request: &AdrRequest,
        window: &[AdrSample],
    ) -> Result<AdrDecision, AdrStrategyError> {
        let required = REQUIRED_SNR_DB
            .get(usize::from(request.data_rate))
            .copied()
            .ok_or(AdrStrategyError::UnsupportedDataRate(request.data_rate))?;
        let max_snr = window
            .iter()
            .map(|sample| sample.snr)
            .fold(request.snr, f64::max);
        let margin = max_snr - required - INSTALLATION_MARGIN_DB;
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Margin steps are clamped to a small integer range first."
        )]
        let mut steps = (margin / STEP_MARGIN_DB).floor().clamp(-64.0, 64.0) as i32;
        let mut data_rate = request.data_rate;
        while steps > 0 && data_rate < MAX_DATA_RATE {
            data_rate += 1;
            steps -= 1;
        }
        // Power index 0 is full output; leftover margin backs output off,
        // never past the device's supported index. Negative margin stays at
        // full output.
        let max_power_index = i32::from(request.required_tx_power);
        let tx_power = u8::try_from(steps.max(0).min(max_power_index))
            .map_err(|_| AdrStrategyError::WindowNotUsable("power index".to_string()))?;
        let nb_repetition = recommend_repetition(window)?;
        Ok(AdrDecision {
            data_rate,
            tx_power,
            nb_repetition,
        })
    }
}

/// Derives a repetition count from the window's delivery ratio.
fn recommend_repetition(window: &[AdrSample]) -> Result<u8, AdrStrategyError> {
    let first = window
        .first()
        .ok_or_else(|| AdrStrategyError::WindowNotUsable("empty window".to_string()))?;
    let last = window
        .last()
        .ok_or_else(|| AdrStrategyError::WindowNotUsable("empty window".to_string()))?;
    let span = last.fcnt_up.saturating_sub(first.fcnt_up).saturating_add(1);
    if span == 0 {
        return Err(AdrStrategyError::WindowNotUsable("counter span".to_string()));
    }
    #[allow(
        clippy::cast_precision_loss,
        reason = "Window lengths and counter spans are far below 2^52."
    )]
    let ratio = window.len() as f64 / f64::from(span);
    if ratio >= 0.85 {
        Ok(1)
    } else if ratio >= 0.5 {
        Ok(2)
    } else {
        Ok(3)
    }
}

// ============================================================================
// SECTION: Track Outcome
// ============================================================================

/// Result of folding one sample into the window.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AdrTrackOutcome {
    /// Samples currently in the window.
    pub(crate) window: Vec<AdrSample>,
    /// Last entry after the update.
    pub(crate) last: AdrLastEntry,
    /// True when the report is older than the tracked counter.
    pub(crate) stale: bool,
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Windowing engine with a pluggable decision strategy.
pub struct AdrEngine {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
    /// Decision strategy supplied by the host.
    strategy: Arc<dyn AdrStrategy>,
    /// Capture threshold and window bound.
    capacity: usize,
}

impl AdrEngine {
    /// Creates an engine with the supplied strategy and the default window
    /// bound.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, strategy: Arc<dyn AdrStrategy>) -> Self {
        Self::with_capacity(store, strategy, ADR_WINDOW_CAPACITY)
    }

    /// Creates an engine with an explicit window bound.
    #[must_use]
    pub fn with_capacity(
        store: Arc<dyn LeaseStore>,
        strategy: Arc<dyn AdrStrategy>,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            strategy,
            capacity,
        }
    }

    /// Handles one ADR request end to end, taking the device lease itself.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::LeaseTimeout`] when the device lease is not
    /// granted within the retry bound, or cache/store errors.
    pub fn handle(&self, request: &AdrRequest) -> Result<AdrReply, ArbiterError> {
        let mut cache = DeviceCache::new(
            Arc::clone(&self.store),
            request.device_id.clone(),
            request.gateway_id.as_str(),
        );
        if !cache.try_lock(AcquireMode::Block)? {
            return Err(ArbiterError::LeaseTimeout(request.device_id.clone()));
        }
        let outcome = self.track(request)?;
        let reply = if self.ready_to_confirm(request, &outcome) {
            match self.strategy.compute(request, &outcome.window) {
                Ok(decision) => {
                    let next = frame_counter::execute(
                        &cache,
                        &FrameCounterRequest {
                            device_id: request.device_id.clone(),
                            gateway_id: request.gateway_id.clone(),
                            client_fcnt_up: request.fcnt_up,
                            client_fcnt_down: request.fcnt_down,
                            reset: false,
                        },
                    )?;
                    self.confirmed(&outcome, decision, next)
                }
                Err(_) => AdrReply::not_ready(outcome.window.len()),
            }
        } else {
            AdrReply::not_ready(outcome.window.len())
        };
        cache.unlock()?;
        Ok(reply)
    }

    /// Returns true when the window and winner allow a confirmation.
    pub(crate) fn ready_to_confirm(&self, request: &AdrRequest, outcome: &AdrTrackOutcome) -> bool {
        !outcome.stale
            && outcome.window.len() >= self.capacity
            && outcome.last.gateway_id == request.gateway_id
            && outcome.last.fcnt_up == request.fcnt_up
    }

    /// Builds the confirming reply for a computed decision.
    pub(crate) fn confirmed(
        &self,
        outcome: &AdrTrackOutcome,
        decision: AdrDecision,
        next_fcnt_down: u32,
    ) -> AdrReply {
        AdrReply {
            can_confirm_to_device: next_fcnt_down != 0,
            data_rate: Some(decision.data_rate),
            tx_power: Some(decision.tx_power),
            nb_repetition: Some(decision.nb_repetition),
            fcnt_down: (next_fcnt_down != 0).then_some(next_fcnt_down),
            number_of_frames: outcome.window.len(),
        }
    }

    /// Runs the configured strategy for a tracked window.
    pub(crate) fn compute(
        &self,
        request: &AdrRequest,
        window: &[AdrSample],
    ) -> Result<AdrDecision, AdrStrategyError> {
        self.strategy.compute(request, window)
    }

    /// Folds one sample into the device's window and last entry.
    ///
    /// Must run while the caller holds the device lease; the window shares
    /// the counter record's locking discipline.
    pub(crate) fn track(&self, request: &AdrRequest) -> Result<AdrTrackOutcome, ArbiterError> {
        let last_key = adr_last_key(&request.device_id);
        let window_key = adr_window_key(&request.device_id);
        let previous = self.load_last(&last_key)?;
        match previous {
            Some(mut last) if last.fcnt_up == request.fcnt_up => {
                last.repeat_count = last.repeat_count.saturating_add(1);
                if request.snr > last.snr {
                    last.snr = request.snr;
                    last.gateway_id = request.gateway_id.clone();
                }
                self.store_last(&last_key, &last)?;
                let window = self.load_window(&window_key)?;
                Ok(AdrTrackOutcome {
                    window,
                    last,
                    stale: false,
                })
            }
            Some(last) if last.fcnt_up > request.fcnt_up => {
                let window = self.load_window(&window_key)?;
                Ok(AdrTrackOutcome {
                    window,
                    last,
                    stale: true,
                })
            }
            _ => {
                let sample = AdrSample {
                    gateway_id: request.gateway_id.clone(),
                    snr: request.snr,
                    data_rate: request.data_rate,
                    fcnt_up: request.fcnt_up,
                    fcnt_down: request.fcnt_down,
                };
                let document = serde_json::to_string(&sample)
                    .map_err(|err| ArbiterError::Codec(err.to_string()))?;
                self.store.list_append(&window_key, &document, Some(DEVICE_COUNTER_TTL))?;
                self.store.list_trim(&window_key, self.capacity)?;
                let last = AdrLastEntry {
                    gateway_id: request.gateway_id.clone(),
                    snr: request.snr,
                    fcnt_up: request.fcnt_up,
                    repeat_count: 1,
                };
                self.store_last(&last_key, &last)?;
                let window = self.load_window(&window_key)?;
                Ok(AdrTrackOutcome {
                    window,
                    last,
                    stale: false,
                })
            }
        }
    }

    /// Clears the window and last entry for a device.
    ///
    /// # Errors
    ///
    /// Returns [`ArbiterError::LeaseTimeout`] when the device lease is not
    /// granted within the retry bound, or store errors.
    pub fn reset(&self, device_id: &DeviceId, owner: &str) -> Result<(), ArbiterError> {
        let mut cache =
            DeviceCache::new(Arc::clone(&self.store), device_id.clone(), owner);
        if !cache.try_lock(AcquireMode::Block)? {
            return Err(ArbiterError::LeaseTimeout(device_id.clone()));
        }
        self.store.delete(&adr_window_key(device_id))?;
        self.store.delete(&adr_last_key(device_id))?;
        cache.unlock()?;
        Ok(())
    }

    /// Loads the stored last entry.
    fn load_last(&self, key: &str) -> Result<Option<AdrLastEntry>, ArbiterError> {
        let Some(document) = self.store.get(key)? else {
            return Ok(None);
        };
        let last = serde_json::from_str(&document)
            .map_err(|err| ArbiterError::Codec(err.to_string()))?;
        Ok(Some(last))
    }

    /// Persists the last entry.
    fn store_last(&self, key: &str, last: &AdrLastEntry) -> Result<(), ArbiterError> {
        let document = serde_json::to_string(last)
            .map_err(|err| ArbiterError::Codec(err.to_string()))?;
        self.store.set(key, &document, Some(DEVICE_COUNTER_TTL))?;
        Ok(())
    }

    /// Loads the sample window, oldest first.
    fn load_window(&self, key: &str) -> Result<Vec<AdrSample>, ArbiterError> {
        let documents = self.store.list_range(key)?;
        documents
            .iter()
            .map(|document| {
                serde_json::from_str(document)
                    .map_err(|err| ArbiterError::Codec(err.to_string()))
            })
            .collect()
    }
}
