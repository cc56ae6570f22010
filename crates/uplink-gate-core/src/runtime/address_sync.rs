// crates/uplink-gate-core/src/runtime/address_sync.rs
// ============================================================================
// Module: Device-Address Synchronizer
// Description: Keeps the address-to-identity cache fresh from the registry.
// Purpose: Full and delta reloads behind TTL gates, plus on-demand lookup.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Many service instances run the synchronizer; the lease store's gate keys
//! elect the one that actually works. The full-reload gate fires roughly once
//! a day and additionally requires the global-update gate, serializing full
//! reloads fleet-wide; the delta gate paces incremental reloads. A failed
//! reload shortens its gate's TTL so another instance retries soon, and a
//! crashed holder is covered by gate expiry. Readers never block on reloads:
//! they observe a possibly-stale but monotonically-improving cache.
//!
//! On-demand lookups take a per-address lease on a miss so the registry's
//! paged query runs exactly once no matter how many instances miss
//! concurrently; the losers wake up, re-check the cache, and return the
//! winner's result. Confirmed-unknown addresses cache an empty marker so
//! repeated lookups do not stampede the registry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

use crate::core::identifiers::DevAddr;
use crate::core::records::DELTA_RELOAD_GATE_KEY;
use crate::core::records::DELTA_RELOAD_GATE_TTL;
use crate::core::records::DELTA_RELOAD_MARK_KEY;
use crate::core::records::DEVICE_ADDRESS_TTL;
use crate::core::records::DeviceAddressRecord;
use crate::core::records::FULL_RELOAD_GATE_KEY;
use crate::core::records::FULL_RELOAD_GATE_TTL;
use crate::core::records::FULL_RELOAD_RETRY_TTL;
use crate::core::records::GLOBAL_UPDATE_GATE_KEY;
use crate::core::records::GLOBAL_UPDATE_GATE_TTL;
use crate::core::records::devaddr_key;
use crate::core::records::devaddr_lock_key;
use crate::core::time::Timestamp;
use crate::interfaces::AcquireMode;
use crate::interfaces::CancelToken;
use crate::interfaces::DeviceTwin;
use crate::interfaces::IdentityRegistry;
use crate::interfaces::LeaseStore;
use crate::interfaces::RegistryError;
use crate::interfaces::StoreError;
use crate::interfaces::TwinFilter;
use crate::runtime::device_cache::DeviceLease;
use crate::runtime::telemetry::NoopTelemetry;
use crate::runtime::telemetry::ReloadKind;
use crate::runtime::telemetry::ReloadOutcome;
use crate::runtime::telemetry::SyncTelemetry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Hash field marking a confirmed-unknown address.
const EMPTY_MARKER_FIELD: &str = "__none__";
/// Index hash of every address the cache currently holds.
const DEVADDR_INDEX_KEY: &str = "devaddr-index";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Synchronizer errors.
///
/// # Invariants
/// - Errors never escape the background worker; it contains them and moves
///   to the next tick.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Lease store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Identity registry call failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// A cached record failed to encode or decode.
    #[error("address cache codec error: {0}")]
    Codec(String),
    /// The caller's request lifetime ended before the operation completed.
    #[error("address synchronization cancelled")]
    Cancelled,
    /// The background worker thread could not be spawned.
    #[error("synchronizer spawn failed: {0}")]
    Spawn(String),
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Synchronizer tuning knobs.
///
/// # Invariants
/// - `page_size` is greater than zero.
#[derive(Debug, Clone)]
pub struct AddressSyncConfig {
    /// Page size for registry twin queries.
    pub page_size: usize,
    /// TTL applied to device-address hashes, reset on write.
    pub record_ttl: Duration,
    /// TTL of the full-reload gate.
    pub full_gate_ttl: Duration,
    /// Shortened full-reload gate TTL applied after a failure.
    pub full_retry_ttl: Duration,
    /// TTL of the delta-reload gate.
    pub delta_gate_ttl: Duration,
    /// TTL of the global-update gate.
    pub global_gate_ttl: Duration,
    /// TTL of the per-address lookup lease.
    pub lookup_lock_ttl: Duration,
    /// Background worker tick interval.
    pub tick: Duration,
}

impl Default for AddressSyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            record_ttl: DEVICE_ADDRESS_TTL,
            full_gate_ttl: FULL_RELOAD_GATE_TTL,
            full_retry_ttl: FULL_RELOAD_RETRY_TTL,
            delta_gate_ttl: DELTA_RELOAD_GATE_TTL,
            global_gate_ttl: GLOBAL_UPDATE_GATE_TTL,
            lookup_lock_ttl: Duration::from_secs(10),
            tick: Duration::from_secs(5 * 60),
        }
    }
}

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Device-address to identity cache over the lease store.
pub struct DeviceAddressCache {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
    /// Device-identity registry.
    registry: Arc<dyn IdentityRegistry>,
    /// Tuning knobs.
    config: AddressSyncConfig,
    /// Instance identity used as the gate and lock owner.
    owner: String,
    /// Telemetry sink for reload and lookup outcomes.
    telemetry: Arc<dyn SyncTelemetry>,
}

impl DeviceAddressCache {
    /// Creates a cache; `owner` identifies this service instance in gates.
    #[must_use]
    pub fn new(
        store: Arc<dyn LeaseStore>,
        registry: Arc<dyn IdentityRegistry>,
        config: AddressSyncConfig,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            owner: owner.into(),
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    /// Replaces the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn SyncTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Resolves an address to its cached device records, filling the cache
    /// from the registry on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the store or registry fails.
    pub fn resolve(
        &self,
        addr: &DevAddr,
        cancel: &CancelToken,
    ) -> Result<Vec<DeviceAddressRecord>, SyncError> {
        if let Some(records) = self.read_cached(addr)? {
            self.telemetry.record_lookup(true);
            self.store.expire(&devaddr_key(addr), self.config.record_ttl)?;
            return Ok(records);
        }
        self.telemetry.record_lookup(false);
        let lock = DeviceLease::acquire(
            Arc::clone(&self.store),
            devaddr_lock_key(addr),
            self.owner.clone(),
            self.config.lookup_lock_ttl,
            AcquireMode::Block,
        )?;
        // Whoever held the lock first may have filled the cache meanwhile.
        if let Some(records) = self.read_cached(addr)? {
            drop(lock);
            return Ok(records);
        }
        let records = self.fill_from_registry(addr, cancel)?;
        drop(lock);
        Ok(records)
    }

    /// Runs a full reload when this instance wins the gates.
    ///
    /// Returns `Ok(false)` when another instance holds a gate.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] on store or registry failure; the full gate's
    /// TTL is shortened first so another instance retries soon.
    pub fn full_reload(&self, cancel: &CancelToken) -> Result<bool, SyncError> {
        let started = Instant::now();
        if !self.store.try_acquire(
            FULL_RELOAD_GATE_KEY,
            &self.owner,
            self.config.full_gate_ttl,
            AcquireMode::Once,
        )? {
            self.telemetry
                .record_reload(ReloadKind::Full, ReloadOutcome::Skipped, started.elapsed());
            return Ok(false);
        }
        if !self.store.try_acquire(
            GLOBAL_UPDATE_GATE_KEY,
            &self.owner,
            self.config.global_gate_ttl,
            AcquireMode::Once,
        )? {
            // Another instance is mid-update; retry the full pass soon
            // instead of waiting a whole cycle.
            self.store.expire(FULL_RELOAD_GATE_KEY, self.config.full_retry_ttl)?;
            self.telemetry
                .record_reload(ReloadKind::Full, ReloadOutcome::Skipped, started.elapsed());
            return Ok(false);
        }
        let result = self.run_full_reload(cancel);
        let release = self.store.release(GLOBAL_UPDATE_GATE_KEY, &self.owner);
        match result {
            Ok(()) => {
                release?;
                self.telemetry
                    .record_reload(ReloadKind::Full, ReloadOutcome::Ok, started.elapsed());
                Ok(true)
            }
            Err(err) => {
                self.store.expire(FULL_RELOAD_GATE_KEY, self.config.full_retry_ttl)?;
                let outcome = if matches!(err, SyncError::Cancelled) {
                    ReloadOutcome::Cancelled
                } else {
                    ReloadOutcome::Failed
                };
                self.telemetry.record_reload(ReloadKind::Full, outcome, started.elapsed());
                Err(err)
            }
        }
    }

    /// Runs a delta reload when this instance wins the delta gate.
    ///
    /// Returns `Ok(false)` when another instance holds the gate.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] on store or registry failure; the delta gate's
    /// TTL is shortened first so another instance retries soon.
    pub fn delta_reload(&self, cancel: &CancelToken) -> Result<bool, SyncError> {
        let started = Instant::now();
        if !self.store.try_acquire(
            DELTA_RELOAD_GATE_KEY,
            &self.owner,
            self.config.delta_gate_ttl,
            AcquireMode::Once,
        )? {
            self.telemetry
                .record_reload(ReloadKind::Delta, ReloadOutcome::Skipped, started.elapsed());
            return Ok(false);
        }
        let result = self.run_delta_reload(cancel);
        match result {
            Ok(()) => {
                self.telemetry
                    .record_reload(ReloadKind::Delta, ReloadOutcome::Ok, started.elapsed());
                Ok(true)
            }
            Err(err) => {
                self.store.expire(DELTA_RELOAD_GATE_KEY, self.config.full_retry_ttl)?;
                let outcome = if matches!(err, SyncError::Cancelled) {
                    ReloadOutcome::Cancelled
                } else {
                    ReloadOutcome::Failed
                };
                self.telemetry.record_reload(ReloadKind::Delta, outcome, started.elapsed());
                Err(err)
            }
        }
    }

    /// Reads cached records for an address; `None` means a true miss.
    fn read_cached(&self, addr: &DevAddr) -> Result<Option<Vec<DeviceAddressRecord>>, SyncError> {
        let fields = self.store.hash_get_all(&devaddr_key(addr))?;
        if fields.is_empty() {
            return Ok(None);
        }
        if fields.len() == 1 && fields.contains_key(EMPTY_MARKER_FIELD) {
            return Ok(Some(Vec::new()));
        }
        let mut records = Vec::with_capacity(fields.len());
        for (field, document) in &fields {
            if field == EMPTY_MARKER_FIELD {
                continue;
            }
            let record = serde_json::from_str(document)
                .map_err(|err| SyncError::Codec(err.to_string()))?;
            records.push(record);
        }
        Ok(Some(records))
    }

    /// Queries the registry for one address and caches the result.
    fn fill_from_registry(
        &self,
        addr: &DevAddr,
        cancel: &CancelToken,
    ) -> Result<Vec<DeviceAddressRecord>, SyncError> {
        let filter = TwinFilter::ByDevAddr(addr.clone());
        let mut continuation: Option<String> = None;
        let mut records = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let page = self.registry.query_twins(
                &filter,
                self.config.page_size,
                continuation.as_deref(),
                cancel,
            )?;
            for twin in &page.twins {
                records.push(self.record_from_twin(addr, twin)?);
            }
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        let key = devaddr_key(addr);
        let mut entries = BTreeMap::new();
        if records.is_empty() {
            entries.insert(EMPTY_MARKER_FIELD.to_string(), String::new());
        } else {
            for record in &records {
                let document = serde_json::to_string(record)
                    .map_err(|err| SyncError::Codec(err.to_string()))?;
                entries.insert(record.device_id.to_string(), document);
            }
            self.store
                .hash_set(DEVADDR_INDEX_KEY, addr.as_str(), "1", Some(self.config.record_ttl))?;
        }
        self.store.hash_replace_all(&key, &entries, Some(self.config.record_ttl))?;
        Ok(records)
    }

    /// Builds the cached record for a twin, applying the key-retention rule.
    ///
    /// The identity secret survives only while the twin's `last_updated` is
    /// unchanged since it was cached; otherwise it is cleared and must be
    /// re-fetched.
    fn record_from_twin(
        &self,
        addr: &DevAddr,
        twin: &DeviceTwin,
    ) -> Result<DeviceAddressRecord, SyncError> {
        let retained_key = match twin.network_key() {
            Some(fresh) => Some(fresh.to_string()),
            None => {
                let existing =
                    self.store.hash_get(&devaddr_key(addr), twin.device_id.as_str())?;
                existing
                    .and_then(|document| {
                        serde_json::from_str::<DeviceAddressRecord>(&document).ok()
                    })
                    .filter(|record| record.last_updated == twin.last_updated)
                    .and_then(|record| record.network_key)
            }
        };
        Ok(DeviceAddressRecord {
            device_id: twin.device_id.clone(),
            gateway_id: twin.gateway_id().cloned(),
            network_key: retained_key,
            last_updated: twin.last_updated,
        })
    }

    /// Upserts one twin into its address hash and the index.
    fn upsert_twin(&self, twin: &DeviceTwin) -> Result<Option<Timestamp>, SyncError> {
        let Some(addr) = twin.dev_addr().cloned() else {
            return Ok(None);
        };
        let record = self.record_from_twin(&addr, twin)?;
        let document =
            serde_json::to_string(&record).map_err(|err| SyncError::Codec(err.to_string()))?;
        let key = devaddr_key(&addr);
        // An empty marker under this address is stale now.
        self.store.hash_delete(&key, EMPTY_MARKER_FIELD)?;
        self.store
            .hash_set(&key, twin.device_id.as_str(), &document, Some(self.config.record_ttl))?;
        self.store
            .hash_set(DEVADDR_INDEX_KEY, addr.as_str(), "1", Some(self.config.record_ttl))?;
        Ok(Some(twin.last_updated))
    }

    /// Pages every twin out of the registry and rebuilds the cache.
    fn run_full_reload(&self, cancel: &CancelToken) -> Result<(), SyncError> {
        let mut continuation: Option<String> = None;
        let mut rebuilt: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut high_water = Timestamp::default();
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let page = self.registry.query_twins(
                &TwinFilter::All,
                self.config.page_size,
                continuation.as_deref(),
                cancel,
            )?;
            for twin in &page.twins {
                let Some(addr) = twin.dev_addr().cloned() else {
                    continue;
                };
                let record = self.record_from_twin(&addr, twin)?;
                let document = serde_json::to_string(&record)
                    .map_err(|err| SyncError::Codec(err.to_string()))?;
                rebuilt
                    .entry(addr.as_str().to_string())
                    .or_default()
                    .insert(twin.device_id.to_string(), document);
                if high_water.is_before(twin.last_updated) {
                    high_water = twin.last_updated;
                }
            }
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        let previous_index = self.store.hash_get_all(DEVADDR_INDEX_KEY)?;
        let mut index = BTreeMap::new();
        for (addr, entries) in &rebuilt {
            self.store.hash_replace_all(
                &devaddr_key(&DevAddr::new(addr.clone())),
                entries,
                Some(self.config.record_ttl),
            )?;
            index.insert(addr.clone(), "1".to_string());
        }
        for stale in previous_index.keys() {
            if !rebuilt.contains_key(stale) {
                self.store.delete(&devaddr_key(&DevAddr::new(stale.clone())))?;
            }
        }
        self.store
            .hash_replace_all(DEVADDR_INDEX_KEY, &index, Some(self.config.record_ttl))?;
        self.store.set(
            DELTA_RELOAD_MARK_KEY,
            &high_water.as_unix_millis().to_string(),
            None,
        )?;
        Ok(())
    }

    /// Pages twins updated since the last mark and upserts them.
    fn run_delta_reload(&self, cancel: &CancelToken) -> Result<(), SyncError> {
        let mark = self.load_delta_mark()?;
        let filter = TwinFilter::UpdatedSince(mark);
        let mut continuation: Option<String> = None;
        let mut high_water = mark;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let page = self.registry.query_twins(
                &filter,
                self.config.page_size,
                continuation.as_deref(),
                cancel,
            )?;
            for twin in &page.twins {
                if let Some(updated) = self.upsert_twin(twin)?
                    && high_water.is_before(updated)
                {
                    high_water = updated;
                }
            }
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        self.store.set(
            DELTA_RELOAD_MARK_KEY,
            &high_water.as_unix_millis().to_string(),
            None,
        )?;
        Ok(())
    }

    /// Loads the delta high-water mark; epoch when no reload ran yet.
    fn load_delta_mark(&self) -> Result<Timestamp, SyncError> {
        let Some(raw) = self.store.get(DELTA_RELOAD_MARK_KEY)? else {
            return Ok(Timestamp::default());
        };
        let millis = raw
            .parse::<i64>()
            .map_err(|err| SyncError::Codec(format!("delta mark: {err}")))?;
        Ok(Timestamp::from_unix_millis(millis))
    }
}

// ============================================================================
// SECTION: Background Worker
// ============================================================================

/// Handle to the background synchronizer thread.
///
/// # Invariants
/// - Dropping the handle cancels in-flight work and stops the worker at the
///   next page or tick boundary.
pub struct SyncHandle {
    /// Shutdown signal; dropping the sender also stops the worker.
    shutdown: Option<mpsc::Sender<()>>,
    /// Cancellation token observed by registry-bound work.
    cancel: CancelToken,
    /// Worker thread handle.
    thread: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Stops the worker and waits for it to exit.
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(sender) = self.shutdown.take() {
            let _ = sender.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shutdown.take();
    }
}

/// Timer-driven owner of full and delta reload attempts.
pub struct DeviceAddressSynchronizer;

impl DeviceAddressSynchronizer {
    /// Spawns the background worker for a shared cache.
    ///
    /// Every tick the worker attempts a full reload (the gates decide whether
    /// this instance actually runs one) followed by a delta reload. Reload
    /// errors are contained: the gate TTLs have already been shortened for
    /// retry, and the worker moves to the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Spawn`] when the worker thread cannot start.
    pub fn spawn(cache: Arc<DeviceAddressCache>) -> Result<SyncHandle, SyncError> {
        let (sender, receiver) = mpsc::channel();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let tick = cache.config.tick;
        let thread = thread::Builder::new()
            .name("devaddr-sync".to_string())
            .spawn(move || {
                loop {
                    match receiver.recv_timeout(tick) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            let _ = cache.full_reload(&worker_cancel);
                            let _ = cache.delta_reload(&worker_cancel);
                        }
                    }
                }
            })
            .map_err(|err| SyncError::Spawn(err.to_string()))?;
        Ok(SyncHandle {
            shutdown: Some(sender),
            cancel,
            thread: Some(thread),
        })
    }
}
