// crates/uplink-gate-core/src/runtime/device_cache.rs
// ============================================================================
// Module: Device Cache
// Description: Lease-guarded access to per-device counter state.
// Purpose: Refuse all device state access unless the device lease is held.
// Dependencies: crate::core, crate::interfaces, serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`DeviceLease`] is a scoped acquisition: the factory acquires and the guard
//! releases unconditionally on every exit path, including panics unwinding
//! through the holder. [`DeviceCache`] binds a device identifier and a claimed
//! owner to such a lease and refuses every read or write of the device counter
//! record while the lease is not held. Lease-less access is a caller defect,
//! not a runtime condition: it surfaces as [`CacheError::LeaseViolation`] and
//! is never retried.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::records::DEVICE_COUNTER_TTL;
use crate::core::records::DEVICE_LEASE_TTL;
use crate::core::records::DeviceCounterRecord;
use crate::core::records::counter_key;
use crate::core::records::device_lock_key;
use crate::interfaces::AcquireMode;
use crate::interfaces::LeaseStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Device cache errors.
///
/// # Invariants
/// - [`CacheError::LeaseViolation`] indicates a defect in the calling arbiter
///   and must never be mapped to a retryable outcome.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Protected state was accessed without holding the device lease.
    #[error("device {0}: state accessed without holding its lease")]
    LeaseViolation(DeviceId),
    /// Lease store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A stored record failed to encode or decode.
    #[error("device record codec error: {0}")]
    Codec(String),
}

// ============================================================================
// SECTION: Scoped Lease
// ============================================================================

/// Scoped lease on a store key; releasing is tied to the guard's lifetime.
///
/// # Invariants
/// - Dropping the guard always attempts a release; failures on the drop path
///   are swallowed because the lease TTL bounds the damage.
pub struct DeviceLease {
    /// Store holding the lease.
    store: Arc<dyn LeaseStore>,
    /// Lease key.
    key: String,
    /// Owner tag supplied at acquisition.
    owner: String,
    /// Set once the lease has been explicitly released.
    released: bool,
}

impl DeviceLease {
    /// Acquires the lease for `key`, returning `None` when it is not granted
    /// within the mode's bound.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    pub fn acquire(
        store: Arc<dyn LeaseStore>,
        key: impl Into<String>,
        owner: impl Into<String>,
        ttl: Duration,
        mode: AcquireMode,
    ) -> Result<Option<Self>, StoreError> {
        let key = key.into();
        let owner = owner.into();
        if store.try_acquire(&key, &owner, ttl, mode)? {
            Ok(Some(Self {
                store,
                key,
                owner,
                released: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Releases the lease with strict semantics.
    ///
    /// Returns `Ok(false)` when the lease had already expired or was taken
    /// over by another owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store fails.
    pub fn release(mut self) -> Result<bool, StoreError> {
        self.released = true;
        self.store.release(&self.key, &self.owner)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.store.release(&self.key, &self.owner);
        }
    }
}

// ============================================================================
// SECTION: Device Cache
// ============================================================================

/// Lease-guarded wrapper around one device's counter record.
///
/// # Invariants
/// - Every record access checks lease possession first and fails fast with
///   [`CacheError::LeaseViolation`] otherwise.
pub struct DeviceCache {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
    /// Device whose state this cache guards.
    device_id: DeviceId,
    /// Claimed owner, typically the requesting gateway identifier.
    owner: String,
    /// TTL applied to the device lease.
    lease_ttl: Duration,
    /// Currently held lease, when locked.
    lease: Option<DeviceLease>,
}

impl DeviceCache {
    /// Creates an unlocked cache for `device_id` claimed by `owner`.
    #[must_use]
    pub fn new(store: Arc<dyn LeaseStore>, device_id: DeviceId, owner: impl Into<String>) -> Self {
        Self {
            store,
            device_id,
            owner: owner.into(),
            lease_ttl: DEVICE_LEASE_TTL,
            lease: None,
        }
    }

    /// Overrides the lease TTL; used by hosts with non-default contention
    /// budgets.
    #[must_use]
    pub const fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Returns the device this cache guards.
    #[must_use]
    pub const fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Attempts to take the device lease.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the store fails.
    pub fn try_lock(&mut self, mode: AcquireMode) -> Result<bool, CacheError> {
        if self.lease.is_some() {
            return Ok(true);
        }
        let lease = DeviceLease::acquire(
            Arc::clone(&self.store),
            device_lock_key(&self.device_id),
            self.owner.clone(),
            self.lease_ttl,
            mode,
        )?;
        self.lease = lease;
        Ok(self.lease.is_some())
    }

    /// Returns true while the lease is held by this instance.
    #[must_use]
    pub const fn holds_lease(&self) -> bool {
        self.lease.is_some()
    }

    /// Releases the lease with strict semantics.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] when the store fails.
    pub fn unlock(&mut self) -> Result<bool, CacheError> {
        match self.lease.take() {
            Some(lease) => Ok(lease.release()?),
            None => Ok(false),
        }
    }

    /// Fails fast unless the lease is held.
    fn ensure_lease(&self) -> Result<(), CacheError> {
        if self.lease.is_some() {
            Ok(())
        } else {
            Err(CacheError::LeaseViolation(self.device_id.clone()))
        }
    }

    /// Writes a fresh counter record for the device.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::LeaseViolation`] without the lease, or a store
    /// or codec error.
    pub fn initialize(
        &self,
        fcnt_up: u32,
        fcnt_down: u32,
        gateway_id: GatewayId,
    ) -> Result<DeviceCounterRecord, CacheError> {
        let record = DeviceCounterRecord {
            fcnt_up,
            fcnt_down,
            gateway_id,
        };
        self.store_info(&record)?;
        Ok(record)
    }

    /// Persists the counter record, refreshing its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::LeaseViolation`] without the lease, or a store
    /// or codec error.
    pub fn store_info(&self, record: &DeviceCounterRecord) -> Result<(), CacheError> {
        self.ensure_lease()?;
        let document =
            serde_json::to_string(record).map_err(|err| CacheError::Codec(err.to_string()))?;
        self.store.set(&counter_key(&self.device_id), &document, Some(DEVICE_COUNTER_TTL))?;
        Ok(())
    }

    /// Reads the counter record, `None` when the device was never seen.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::LeaseViolation`] without the lease, or a store
    /// or codec error.
    pub fn try_get_info(&self) -> Result<Option<DeviceCounterRecord>, CacheError> {
        self.ensure_lease()?;
        let Some(document) = self.store.get(&counter_key(&self.device_id))? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&document)
            .map_err(|err| CacheError::Codec(err.to_string()))?;
        Ok(Some(record))
    }

    /// Deletes the counter record.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::LeaseViolation`] without the lease, or a store
    /// error.
    pub fn clear_cache(&self) -> Result<(), CacheError> {
        self.ensure_lease()?;
        self.store.delete(&counter_key(&self.device_id))?;
        Ok(())
    }
}
