// crates/uplink-gate-core/src/interfaces/mod.rs
// ============================================================================
// Module: Uplink Gate Interfaces
// Description: Backend-agnostic interfaces for storage, registry, and fan-out.
// Purpose: Define the contract surfaces used by the Uplink Gate runtime.
// Dependencies: crate::core, rand, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how Uplink Gate integrates with the shared lease store,
//! the device-identity registry, and the gateway notification channels without
//! embedding backend-specific details. All store operations are atomic at
//! single-key granularity; no multi-key transactions are assumed anywhere in
//! the runtime. Registry-bound operations accept a cancellation token tied to
//! the caller's request lifetime; partially-applied cache mutations are
//! idempotent and safe to retry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::DevAddr;
use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Base delay between blocking lease-acquire attempts, milliseconds.
const ACQUIRE_RETRY_BASE_MS: u64 = 20;
/// Random jitter added to each blocking lease-acquire delay, milliseconds.
const ACQUIRE_RETRY_JITTER_MS: u64 = 40;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cooperative cancellation flag shared between a caller and its callees.
///
/// # Invariants
/// - Cancellation is one-way; a cancelled token never becomes live again.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// Shared cancellation flag.
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation for every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true when cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ============================================================================
// SECTION: Lease Store
// ============================================================================

/// Lease store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("lease store io error: {0}")]
    Io(String),
    /// Store backend reported an error.
    #[error("lease store backend error: {0}")]
    Backend(String),
    /// Stored data failed to decode.
    #[error("lease store invalid data: {0}")]
    Invalid(String),
}

/// Acquisition mode for [`LeaseStore::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Attempt exactly once and report the outcome.
    Once,
    /// Retry with jittered backoff until success or the TTL-bounded deadline.
    Block,
}

/// Shared key/value store with a lease (lock) primitive.
///
/// All operations are atomic at single-key granularity. Values are UTF-8
/// documents; the runtime stores JSON. A TTL of `None` means the key does not
/// expire.
pub trait LeaseStore: Send + Sync {
    /// Attempts to acquire the lease for `key` exactly once.
    ///
    /// Returns `Ok(true)` when the caller now holds the lease, including when
    /// it already held it (re-entrant refresh of the TTL).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn acquire_once(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Releases the lease for `key` when `owner` still holds it.
    ///
    /// Returns `Ok(false)` on owner mismatch or prior expiry; callers that
    /// demand strict release semantics must check the flag.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn release(&self, key: &str, owner: &str) -> Result<bool, StoreError>;

    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any prior value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Stores `value` under `key` only when the key is absent.
    ///
    /// Returns `Ok(true)` when the value was written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Deletes `key`; returns `Ok(true)` when a value existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Returns true when `key` holds a live value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Resets the TTL of `key`; returns `Ok(false)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Reads one field of the hash stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Reads all live fields of the hash stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;

    /// Writes one field of the hash stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Replaces the entire hash stored under `key` with `entries`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn hash_replace_all(
        &self,
        key: &str,
        entries: &BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Deletes one field of the hash stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Appends `value` to the list stored under `key`; returns the new length.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn list_append(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<usize, StoreError>;

    /// Reads the full list stored under `key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Drops the oldest list entries so at most `max_len` remain.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn list_trim(&self, key: &str, max_len: usize) -> Result<(), StoreError>;

    /// Reports store readiness for liveness/readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store is unavailable.
    fn readiness(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Acquires the lease for `key`, blocking with jittered bounded retry
    /// when `mode` is [`AcquireMode::Block`].
    ///
    /// The total blocking wait is capped at the requested `ttl`, so a caller
    /// can never wait longer than the lease it is asking for would have lived.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend fails.
    fn try_acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
        mode: AcquireMode,
    ) -> Result<bool, StoreError> {
        if self.acquire_once(key, owner, ttl)? {
            return Ok(true);
        }
        if mode == AcquireMode::Once {
            return Ok(false);
        }
        let deadline = Instant::now() + ttl;
        loop {
            let jitter = rand::thread_rng().gen_range(0 ..= ACQUIRE_RETRY_JITTER_MS);
            thread::sleep(Duration::from_millis(ACQUIRE_RETRY_BASE_MS + jitter));
            if Instant::now() >= deadline {
                return Ok(false);
            }
            if self.acquire_once(key, owner, ttl)? {
                return Ok(true);
            }
        }
    }
}

// ============================================================================
// SECTION: Identity Registry
// ============================================================================

/// Identity registry errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Registry was unreachable.
    #[error("identity registry unreachable: {0}")]
    Unreachable(String),
    /// Registry reported an error.
    #[error("identity registry error: {0}")]
    Backend(String),
    /// Registry returned data the core cannot interpret.
    #[error("identity registry invalid data: {0}")]
    Invalid(String),
    /// The caller's request lifetime ended before the call completed.
    #[error("identity registry call cancelled")]
    Cancelled,
}

/// Identity material held by the registry for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Identity secret for the device.
    pub network_key: String,
}

/// Twin property bag relevant to address resolution.
///
/// # Invariants
/// - Fields are snapshots; consumers must not write them back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwinProperties {
    /// Device network address, when assigned.
    pub dev_addr: Option<DevAddr>,
    /// Owning gateway, when assigned.
    pub gateway_id: Option<GatewayId>,
    /// Identity secret, when the twin exposes one.
    pub network_key: Option<String>,
}

/// Registry twin snapshot for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTwin {
    /// Device identifier the twin belongs to.
    pub device_id: DeviceId,
    /// Desired properties written by operators.
    pub desired: TwinProperties,
    /// Reported properties written by the device path.
    pub reported: TwinProperties,
    /// Last update time of the twin, millisecond precision.
    pub last_updated: Timestamp,
}

impl DeviceTwin {
    /// Returns the effective network address, preferring the device report.
    #[must_use]
    pub fn dev_addr(&self) -> Option<&DevAddr> {
        self.reported.dev_addr.as_ref().or(self.desired.dev_addr.as_ref())
    }

    /// Returns the effective owning gateway, preferring the device report.
    #[must_use]
    pub fn gateway_id(&self) -> Option<&GatewayId> {
        self.reported.gateway_id.as_ref().or(self.desired.gateway_id.as_ref())
    }

    /// Returns the effective identity secret, preferring the device report.
    #[must_use]
    pub fn network_key(&self) -> Option<&str> {
        self.reported
            .network_key
            .as_deref()
            .or(self.desired.network_key.as_deref())
    }
}

/// Predicate for paged twin queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwinFilter {
    /// All twins with a network address.
    All,
    /// Twins whose effective network address matches.
    ByDevAddr(DevAddr),
    /// Twins updated strictly after the mark (millisecond precision).
    UpdatedSince(Timestamp),
}

/// One page of a twin query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TwinPage {
    /// Twins in this page.
    pub twins: Vec<DeviceTwin>,
    /// Continuation token for the next page, `None` at the end.
    pub continuation: Option<String>,
}

/// Backend-agnostic device-identity registry.
pub trait IdentityRegistry: Send + Sync {
    /// Fetches identity material for a device, `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry cannot answer.
    fn get_identity(
        &self,
        device_id: &DeviceId,
        cancel: &CancelToken,
    ) -> Result<Option<DeviceIdentity>, RegistryError>;

    /// Fetches the twin snapshot for a device, `None` when unknown.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry cannot answer.
    fn get_twin(
        &self,
        device_id: &DeviceId,
        cancel: &CancelToken,
    ) -> Result<Option<DeviceTwin>, RegistryError>;

    /// Runs one page of a twin query matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the registry cannot answer.
    fn query_twins(
        &self,
        filter: &TwinFilter,
        page_size: usize,
        continuation: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<TwinPage, RegistryError>;
}

// ============================================================================
// SECTION: Direct Invocation
// ============================================================================

/// Direct-invocation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The target gateway was unreachable.
    #[error("gateway {0} unreachable: {1}")]
    Unreachable(GatewayId, String),
    /// The invocation channel reported an error.
    #[error("invocation error: {0}")]
    Channel(String),
    /// The caller's request lifetime ended before the call completed.
    #[error("invocation cancelled")]
    Cancelled,
}

/// Reply from a direct method invocation on a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationReply {
    /// Status code reported by the gateway.
    pub status: u16,
    /// Optional reply payload.
    pub payload: Option<Value>,
}

/// Push channel invoking a named method on one specific gateway.
pub trait MethodInvoker: Send + Sync {
    /// Invokes `method` on the target gateway with a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError`] when the invocation fails.
    fn invoke(
        &self,
        gateway_id: &GatewayId,
        method: &str,
        payload: &Value,
        cancel: &CancelToken,
    ) -> Result<InvocationReply, InvokeError>;
}

// ============================================================================
// SECTION: Broadcast
// ============================================================================

/// Broadcast errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The broadcast channel reported an error.
    #[error("broadcast error: {0}")]
    Channel(String),
}

/// Fire-and-forget fan-out channel for gateways without a direct channel.
pub trait Broadcaster: Send + Sync {
    /// Publishes `message` on `topic`; delivery is best effort.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError`] when the message cannot be handed off.
    fn publish(&self, topic: &str, message: &str) -> Result<(), BroadcastError>;
}
