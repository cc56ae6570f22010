// crates/uplink-gate-store-sqlite/src/lib.rs
// ============================================================================
// Module: Uplink Gate SQLite Store Library
// Description: Durable LeaseStore backend over SQLite WAL.
// Purpose: Persist coordination state across restarts of a single host.
// Dependencies: rusqlite, serde, thiserror, uplink-gate-core
// ============================================================================

//! ## Overview
//! This crate provides [`SqliteLeaseStore`], a durable implementation of
//! [`uplink_gate_core::LeaseStore`] for deployments whose instances share one
//! host. TTLs are stored as absolute expiry timestamps and enforced with lazy
//! sweeps, so a restarted process observes the same liveness semantics as a
//! store with active eviction.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqliteJournalMode;
pub use store::SqliteLeaseStore;
pub use store::SqliteLeaseStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteSyncMode;
