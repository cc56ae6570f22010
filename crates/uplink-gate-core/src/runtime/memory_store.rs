// crates/uplink-gate-core/src/runtime/memory_store.rs
// ============================================================================
// Module: In-Memory Lease Store
// Description: Process-local LeaseStore with lazy TTL expiry.
// Purpose: Reference backend for single-instance deployments and tests.
// Dependencies: crate::interfaces, std
// ============================================================================

//! ## Overview
//! [`InMemoryLeaseStore`] implements the full [`LeaseStore`] contract with
//! mutex-guarded maps. Expiry is lazy: each operation purges the touched key
//! when its deadline has passed, so the observable semantics match a store
//! with active eviction. Hash keys expire as a whole; a field write refreshes
//! the containing key's TTL.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::Instant;

use crate::interfaces::LeaseStore;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Entries
// ============================================================================

/// A stored value with an optional expiry deadline.
#[derive(Debug, Clone)]
struct ValueEntry {
    /// Stored document.
    value: String,
    /// Expiry deadline, `None` for persistent keys.
    expires_at: Option<Instant>,
}

/// A stored hash with a whole-key expiry deadline.
#[derive(Debug, Clone, Default)]
struct HashEntry {
    /// Hash fields.
    fields: BTreeMap<String, String>,
    /// Expiry deadline, `None` for persistent keys.
    expires_at: Option<Instant>,
}

/// A stored list with a whole-key expiry deadline.
#[derive(Debug, Clone, Default)]
struct ListEntry {
    /// List items, oldest first.
    items: Vec<String>,
    /// Expiry deadline, `None` for persistent keys.
    expires_at: Option<Instant>,
}

/// A held lease.
#[derive(Debug, Clone)]
struct LeaseEntry {
    /// Owner tag supplied at acquisition.
    owner: String,
    /// Expiry deadline of the lease.
    expires_at: Instant,
}

/// Mutable store state behind the mutex.
#[derive(Debug, Default)]
struct MemoryInner {
    /// Plain key/value entries.
    values: BTreeMap<String, ValueEntry>,
    /// Hash entries.
    hashes: BTreeMap<String, HashEntry>,
    /// List entries.
    lists: BTreeMap<String, ListEntry>,
    /// Held leases.
    leases: BTreeMap<String, LeaseEntry>,
}

impl MemoryInner {
    /// Drops the value under `key` when its deadline has passed.
    fn purge_value(&mut self, key: &str, now: Instant) {
        if let Some(entry) = self.values.get(key)
            && entry.expires_at.is_some_and(|deadline| deadline <= now)
        {
            self.values.remove(key);
        }
    }

    /// Drops the hash under `key` when its deadline has passed.
    fn purge_hash(&mut self, key: &str, now: Instant) {
        if let Some(entry) = self.hashes.get(key)
            && entry.expires_at.is_some_and(|deadline| deadline <= now)
        {
            self.hashes.remove(key);
        }
    }

    /// Drops the list under `key` when its deadline has passed.
    fn purge_list(&mut self, key: &str, now: Instant) {
        if let Some(entry) = self.lists.get(key)
            && entry.expires_at.is_some_and(|deadline| deadline <= now)
        {
            self.lists.remove(key);
        }
    }

    /// Drops the lease under `key` when its deadline has passed.
    fn purge_lease(&mut self, key: &str, now: Instant) {
        if let Some(entry) = self.leases.get(key)
            && entry.expires_at <= now
        {
            self.leases.remove(key);
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Process-local lease store with lazy TTL expiry.
///
/// # Invariants
/// - All operations are atomic: they run under one mutex.
/// - Expired entries are never observable; purging happens before access.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    /// Guarded store state.
    inner: Mutex<MemoryInner>,
}

impl InMemoryLeaseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the store state, recovering from poisoning.
    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Converts a TTL into an absolute deadline.
    fn deadline(ttl: Option<Duration>, now: Instant) -> Option<Instant> {
        ttl.map(|ttl| now + ttl)
    }
}

impl LeaseStore for InMemoryLeaseStore {
    fn acquire_once(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_lease(key, now);
        match inner.leases.get_mut(key) {
            Some(entry) if entry.owner == owner => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                inner.leases.insert(
                    key.to_string(),
                    LeaseEntry {
                        owner: owner.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    fn release(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_lease(key, now);
        match inner.leases.get(key) {
            Some(entry) if entry.owner == owner => {
                inner.leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_value(key, now);
        Ok(inner.values.get(key).map(|entry| entry.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Self::deadline(ttl, now),
            },
        );
        Ok(())
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_value(key, now);
        if inner.values.contains_key(key) {
            return Ok(false);
        }
        inner.values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: Self::deadline(ttl, now),
            },
        );
        Ok(true)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_value(key, now);
        inner.purge_hash(key, now);
        inner.purge_list(key, now);
        let existed = inner.values.remove(key).is_some()
            | inner.hashes.remove(key).is_some()
            | inner.lists.remove(key).is_some();
        Ok(existed)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_value(key, now);
        inner.purge_hash(key, now);
        inner.purge_list(key, now);
        Ok(inner.values.contains_key(key)
            || inner.hashes.contains_key(key)
            || inner.lists.contains_key(key))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let deadline = Some(now + ttl);
        let mut inner = self.lock();
        inner.purge_value(key, now);
        inner.purge_hash(key, now);
        inner.purge_list(key, now);
        if let Some(entry) = inner.values.get_mut(key) {
            entry.expires_at = deadline;
            return Ok(true);
        }
        if let Some(entry) = inner.hashes.get_mut(key) {
            entry.expires_at = deadline;
            return Ok(true);
        }
        if let Some(entry) = inner.lists.get_mut(key) {
            entry.expires_at = deadline;
            return Ok(true);
        }
        Ok(false)
    }

    fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_hash(key, now);
        Ok(inner.hashes.get(key).and_then(|entry| entry.fields.get(field).cloned()))
    }

    fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_hash(key, now);
        Ok(inner.hashes.get(key).map(|entry| entry.fields.clone()).unwrap_or_default())
    }

    fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_hash(key, now);
        let entry = inner.hashes.entry(key.to_string()).or_default();
        entry.fields.insert(field.to_string(), value.to_string());
        if ttl.is_some() {
            entry.expires_at = Self::deadline(ttl, now);
        }
        Ok(())
    }

    fn hash_replace_all(
        &self,
        key: &str,
        entries: &BTreeMap<String, String>,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.hashes.insert(
            key.to_string(),
            HashEntry {
                fields: entries.clone(),
                expires_at: Self::deadline(ttl, now),
            },
        );
        Ok(())
    }

    fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_hash(key, now);
        Ok(inner
            .hashes
            .get_mut(key)
            .is_some_and(|entry| entry.fields.remove(field).is_some()))
    }

    fn list_append(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_list(key, now);
        let entry = inner.lists.entry(key.to_string()).or_default();
        entry.items.push(value.to_string());
        if ttl.is_some() {
            entry.expires_at = Self::deadline(ttl, now);
        }
        Ok(entry.items.len())
    }

    fn list_range(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_list(key, now);
        Ok(inner.lists.get(key).map(|entry| entry.items.clone()).unwrap_or_default())
    }

    fn list_trim(&self, key: &str, max_len: usize) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut inner = self.lock();
        inner.purge_list(key, now);
        if let Some(entry) = inner.lists.get_mut(key)
            && entry.items.len() > max_len
        {
            let drop_count = entry.items.len() - max_len;
            entry.items.drain(.. drop_count);
        }
        Ok(())
    }
}
