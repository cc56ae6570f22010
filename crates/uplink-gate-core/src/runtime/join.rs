// crates/uplink-gate-core/src/runtime/join.rs
// ============================================================================
// Module: Join Handler
// Description: Network-join validation with nonce replay and ownership guards.
// Purpose: Accept each (device, nonce) pair at most once, for one gateway.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde, thiserror
// ============================================================================

//! ## Overview
//! A join request claims a device for the requesting gateway and opens a new
//! session. The handler distinguishes expected business refusals from faults:
//! an unknown device, a replayed nonce, or a device already claimed by a
//! different gateway produce a [`JoinRefusal`] value with a human-readable
//! reason; only infrastructure problems surface as [`JoinError`]. The nonce
//! replay guard is an atomic set-if-absent, so the exactly-once property
//! holds under concurrent submission.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::DevNonce;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::records::DEV_NONCE_TTL;
use crate::core::records::JOIN_VALIDATION_TTL;
use crate::core::records::JoinValidationRecord;
use crate::core::records::join_key;
use crate::core::records::nonce_key;
use crate::interfaces::AcquireMode;
use crate::interfaces::CancelToken;
use crate::interfaces::IdentityRegistry;
use crate::interfaces::LeaseStore;
use crate::interfaces::RegistryError;
use crate::interfaces::StoreError;
use crate::runtime::device_cache::CacheError;
use crate::runtime::device_cache::DeviceCache;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Join handler faults.
///
/// # Invariants
/// - Business refusals are never represented here; see [`JoinRefusal`].
#[derive(Debug, Error)]
pub enum JoinError {
    /// The device lease was not acquired within the retry bound.
    #[error("device {0}: lease not acquired within the retry bound")]
    LeaseTimeout(DeviceId),
    /// Lease store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Device cache access failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Identity registry call failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A stored record failed to encode or decode.
    #[error("join record codec error: {0}")]
    Codec(String),
}

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Join request from one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Device asking to join.
    pub device_id: DeviceId,
    /// Gateway forwarding the join and asking to own the session.
    pub gateway_id: GatewayId,
    /// One-time join nonce.
    pub dev_nonce: DevNonce,
}

/// Expected business refusals for a join request.
///
/// # Invariants
/// - Variants are stable for programmatic handling; `reason` is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinRefusal {
    /// The registry does not know the device.
    UnknownDevice,
    /// The (device, nonce) pair was already accepted.
    NonceAlreadyUsed,
    /// Another gateway already owns the device's session.
    NotOwningGateway,
}

impl JoinRefusal {
    /// Returns a human-readable refusal reason.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::UnknownDevice => "not in our network",
            Self::NonceAlreadyUsed => "join nonce already used",
            Self::NotOwningGateway => "not the owning gateway",
        }
    }
}

/// Join outcome: accepted with a validation record, or refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The join was accepted and the session record written.
    Accepted {
        /// Gateway recorded as the desired session owner.
        desired_gateway_id: GatewayId,
    },
    /// The join was refused for an expected business reason.
    Refused(JoinRefusal),
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Join validation handler.
pub struct JoinHandler {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
    /// Device-identity registry.
    registry: Arc<dyn IdentityRegistry>,
}

impl JoinHandler {
    /// Creates a handler over the shared store and registry.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, registry: Arc<dyn IdentityRegistry>) -> Self {
        Self {
            store,
            registry,
        }
    }

    /// Validates one join request.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError`] for infrastructure faults only; business
    /// refusals come back as [`JoinOutcome::Refused`].
    pub fn handle(
        &self,
        request: &JoinRequest,
        cancel: &CancelToken,
    ) -> Result<JoinOutcome, JoinError> {
        let Some(identity) = self.registry.get_identity(&request.device_id, cancel)? else {
            return Ok(JoinOutcome::Refused(JoinRefusal::UnknownDevice));
        };
        let nonce_claimed = self.store.set_if_absent(
            &nonce_key(&request.device_id, request.dev_nonce),
            &request.dev_nonce.to_string(),
            Some(DEV_NONCE_TTL),
        )?;
        if !nonce_claimed {
            return Ok(JoinOutcome::Refused(JoinRefusal::NonceAlreadyUsed));
        }
        let mut cache = DeviceCache::new(
            Arc::clone(&self.store),
            request.device_id.clone(),
            request.gateway_id.as_str(),
        );
        if !cache.try_lock(AcquireMode::Block)? {
            return Err(JoinError::LeaseTimeout(request.device_id.clone()));
        }
        let outcome = self.validate_ownership(request, &cache, identity.network_key)?;
        cache.unlock()?;
        Ok(outcome)
    }

    /// Applies the ownership rule and writes the session records.
    ///
    /// Runs while the device lease is held: the join record and the counter
    /// reset are device state.
    fn validate_ownership(
        &self,
        request: &JoinRequest,
        cache: &DeviceCache,
        network_key: String,
    ) -> Result<JoinOutcome, JoinError> {
        let key = join_key(&request.device_id);
        if let Some(document) = self.store.get(&key)? {
            let existing: JoinValidationRecord = serde_json::from_str(&document)
                .map_err(|err| JoinError::Codec(err.to_string()))?;
            if existing.desired_gateway_id != request.gateway_id {
                return Ok(JoinOutcome::Refused(JoinRefusal::NotOwningGateway));
            }
        }
        let record = JoinValidationRecord {
            network_key,
            desired_gateway_id: request.gateway_id.clone(),
        };
        let document =
            serde_json::to_string(&record).map_err(|err| JoinError::Codec(err.to_string()))?;
        self.store.set(&key, &document, Some(JOIN_VALIDATION_TTL))?;
        // A successful join starts a fresh session; stale counters would
        // poison the new one.
        cache.clear_cache()?;
        Ok(JoinOutcome::Accepted {
            desired_gateway_id: request.gateway_id.clone(),
        })
    }
}
