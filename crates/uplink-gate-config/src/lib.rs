// crates/uplink-gate-config/src/lib.rs
// ============================================================================
// Module: Uplink Gate Configuration Library
// Description: Strict TOML configuration for the arbitration service.
// Purpose: Load and validate host configuration with fail-closed semantics.
// Dependencies: serde, thiserror, toml, uplink-gate-core, uplink-gate-store-sqlite
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed: every section validates its
//! bounds before the service starts, so a misconfigured window or gate TTL
//! never reaches the arbiters.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AddressSyncSection;
pub use config::AdrSection;
pub use config::ConfigError;
pub use config::LeaseSection;
pub use config::LeaseStoreSection;
pub use config::PreferredGatewaySection;
pub use config::UplinkGateConfig;
