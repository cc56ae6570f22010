// crates/uplink-gate-config/src/config.rs
// ============================================================================
// Module: Uplink Gate Configuration
// Description: Configuration loading and validation for Uplink Gate.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: serde, toml, uplink-gate-core, uplink-gate-store-sqlite
// ============================================================================

//! ## Overview
//! The configuration covers the tunable halves of the arbitration core: the
//! device lease TTL, the ADR window bound, the preferred-gateway window, the
//! address synchronizer's gates and cadence, and the lease-store backend.
//! Every bound exists because the concurrency model depends on it: protected
//! operations must complete well within the lease TTL, and gate TTLs order
//! the synchronizer's election.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use uplink_gate_core::runtime::AddressSyncConfig;
use uplink_gate_store_sqlite::SqliteLeaseStoreConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "uplink-gate.toml";
/// Environment variable used to override the config path.
pub(crate) const CONFIG_ENV_VAR: &str = "UPLINK_GATE_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Minimum device lease TTL in milliseconds.
pub(crate) const MIN_DEVICE_LEASE_TTL_MS: u64 = 1_000;
/// Maximum device lease TTL in milliseconds.
pub(crate) const MAX_DEVICE_LEASE_TTL_MS: u64 = 300_000;
/// Minimum ADR window capacity.
pub(crate) const MIN_ADR_WINDOW_CAPACITY: usize = 1;
/// Maximum ADR window capacity.
pub(crate) const MAX_ADR_WINDOW_CAPACITY: usize = 256;
/// Minimum preferred-gateway window in milliseconds.
pub(crate) const MIN_PREFERRED_WINDOW_MS: u64 = 50;
/// Maximum preferred-gateway window in milliseconds.
pub(crate) const MAX_PREFERRED_WINDOW_MS: u64 = 5_000;
/// Minimum registry page size.
pub(crate) const MIN_SYNC_PAGE_SIZE: usize = 1;
/// Maximum registry page size.
pub(crate) const MAX_SYNC_PAGE_SIZE: usize = 1_000;
/// Minimum synchronizer tick in milliseconds.
pub(crate) const MIN_SYNC_TICK_MS: u64 = 1_000;
/// Maximum synchronizer tick in milliseconds.
pub(crate) const MAX_SYNC_TICK_MS: u64 = 3_600_000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// Configuration file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Uplink Gate service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UplinkGateConfig {
    /// Device lease configuration.
    #[serde(default)]
    pub leases: LeaseSection,
    /// ADR engine configuration.
    #[serde(default)]
    pub adr: AdrSection,
    /// Preferred-gateway election configuration.
    #[serde(default)]
    pub preferred_gateway: PreferredGatewaySection,
    /// Device-address synchronizer configuration.
    #[serde(default)]
    pub address_sync: AddressSyncSection,
    /// Lease-store backend configuration.
    #[serde(default)]
    pub lease_store: LeaseStoreSection,
}

impl UplinkGateConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.leases.validate()?;
        self.adr.validate()?;
        self.preferred_gateway.validate()?;
        self.address_sync.validate()?;
        self.lease_store.validate()?;
        Ok(())
    }

    /// Returns the configured device lease TTL.
    #[must_use]
    pub const fn device_lease_ttl(&self) -> Duration {
        Duration::from_millis(self.leases.device_lease_ttl_ms)
    }

    /// Returns the configured preferred-gateway window.
    #[must_use]
    pub const fn preferred_gateway_window(&self) -> Duration {
        Duration::from_millis(self.preferred_gateway.window_ms)
    }

    /// Builds the synchronizer configuration for the core runtime.
    #[must_use]
    pub const fn address_sync_config(&self) -> AddressSyncConfig {
        AddressSyncConfig {
            page_size: self.address_sync.page_size,
            record_ttl: Duration::from_millis(self.address_sync.record_ttl_ms),
            full_gate_ttl: Duration::from_millis(self.address_sync.full_gate_ttl_ms),
            full_retry_ttl: Duration::from_millis(self.address_sync.full_retry_ttl_ms),
            delta_gate_ttl: Duration::from_millis(self.address_sync.delta_gate_ttl_ms),
            global_gate_ttl: Duration::from_millis(self.address_sync.global_gate_ttl_ms),
            lookup_lock_ttl: Duration::from_millis(self.address_sync.lookup_lock_ttl_ms),
            tick: Duration::from_millis(self.address_sync.tick_ms),
        }
    }
}

/// Device lease configuration.
///
/// # Invariants
/// - All protected operations must complete well within the lease TTL.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseSection {
    /// Device lease TTL in milliseconds.
    #[serde(default = "default_device_lease_ttl_ms")]
    pub device_lease_ttl_ms: u64,
}

impl Default for LeaseSection {
    fn default() -> Self {
        Self {
            device_lease_ttl_ms: default_device_lease_ttl_ms(),
        }
    }
}

impl LeaseSection {
    /// Validates lease bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_range_u64(
            "leases.device_lease_ttl_ms",
            self.device_lease_ttl_ms,
            MIN_DEVICE_LEASE_TTL_MS,
            MAX_DEVICE_LEASE_TTL_MS,
        )
    }
}

/// Returns the default device lease TTL in milliseconds.
const fn default_device_lease_ttl_ms() -> u64 {
    30_000
}

/// ADR engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdrSection {
    /// Capture threshold and window bound.
    #[serde(default = "default_adr_window_capacity")]
    pub window_capacity: usize,
}

impl Default for AdrSection {
    fn default() -> Self {
        Self {
            window_capacity: default_adr_window_capacity(),
        }
    }
}

impl AdrSection {
    /// Validates ADR bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_ADR_WINDOW_CAPACITY ..= MAX_ADR_WINDOW_CAPACITY).contains(&self.window_capacity) {
            return Err(ConfigError::Invalid(format!(
                "adr.window_capacity out of range: {} (expected {MIN_ADR_WINDOW_CAPACITY}..={MAX_ADR_WINDOW_CAPACITY})",
                self.window_capacity
            )));
        }
        Ok(())
    }
}

/// Returns the default ADR window capacity.
const fn default_adr_window_capacity() -> usize {
    20
}

/// Preferred-gateway election configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PreferredGatewaySection {
    /// Collection window in milliseconds.
    #[serde(default = "default_preferred_window_ms")]
    pub window_ms: u64,
}

impl Default for PreferredGatewaySection {
    fn default() -> Self {
        Self {
            window_ms: default_preferred_window_ms(),
        }
    }
}

impl PreferredGatewaySection {
    /// Validates window bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_range_u64(
            "preferred_gateway.window_ms",
            self.window_ms,
            MIN_PREFERRED_WINDOW_MS,
            MAX_PREFERRED_WINDOW_MS,
        )
    }
}

/// Returns the default preferred-gateway window in milliseconds.
const fn default_preferred_window_ms() -> u64 {
    400
}

/// Device-address synchronizer configuration.
///
/// # Invariants
/// - The full gate outlives the delta gate, and the failure-retry TTL is
///   shorter than both; otherwise the election degenerates.
#[derive(Debug, Clone, Deserialize)]
pub struct AddressSyncSection {
    /// Page size for registry twin queries.
    #[serde(default = "default_sync_page_size")]
    pub page_size: usize,
    /// TTL applied to device-address hashes in milliseconds.
    #[serde(default = "default_record_ttl_ms")]
    pub record_ttl_ms: u64,
    /// Full-reload gate TTL in milliseconds.
    #[serde(default = "default_full_gate_ttl_ms")]
    pub full_gate_ttl_ms: u64,
    /// Shortened full-reload gate TTL after a failure, milliseconds.
    #[serde(default = "default_full_retry_ttl_ms")]
    pub full_retry_ttl_ms: u64,
    /// Delta-reload gate TTL in milliseconds.
    #[serde(default = "default_delta_gate_ttl_ms")]
    pub delta_gate_ttl_ms: u64,
    /// Global-update gate TTL in milliseconds.
    #[serde(default = "default_global_gate_ttl_ms")]
    pub global_gate_ttl_ms: u64,
    /// Per-address lookup lease TTL in milliseconds.
    #[serde(default = "default_lookup_lock_ttl_ms")]
    pub lookup_lock_ttl_ms: u64,
    /// Background worker tick in milliseconds.
    #[serde(default = "default_sync_tick_ms")]
    pub tick_ms: u64,
}

impl Default for AddressSyncSection {
    fn default() -> Self {
        Self {
            page_size: default_sync_page_size(),
            record_ttl_ms: default_record_ttl_ms(),
            full_gate_ttl_ms: default_full_gate_ttl_ms(),
            full_retry_ttl_ms: default_full_retry_ttl_ms(),
            delta_gate_ttl_ms: default_delta_gate_ttl_ms(),
            global_gate_ttl_ms: default_global_gate_ttl_ms(),
            lookup_lock_ttl_ms: default_lookup_lock_ttl_ms(),
            tick_ms: default_sync_tick_ms(),
        }
    }
}

impl AddressSyncSection {
    /// Validates bounds and the gate ordering.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SYNC_PAGE_SIZE ..= MAX_SYNC_PAGE_SIZE).contains(&self.page_size) {
            return Err(ConfigError::Invalid(format!(
                "address_sync.page_size out of range: {} (expected {MIN_SYNC_PAGE_SIZE}..={MAX_SYNC_PAGE_SIZE})",
                self.page_size
            )));
        }
        ensure_range_u64("address_sync.tick_ms", self.tick_ms, MIN_SYNC_TICK_MS, MAX_SYNC_TICK_MS)?;
        ensure_nonzero_u64("address_sync.record_ttl_ms", self.record_ttl_ms)?;
        ensure_nonzero_u64("address_sync.full_gate_ttl_ms", self.full_gate_ttl_ms)?;
        ensure_nonzero_u64("address_sync.full_retry_ttl_ms", self.full_retry_ttl_ms)?;
        ensure_nonzero_u64("address_sync.delta_gate_ttl_ms", self.delta_gate_ttl_ms)?;
        ensure_nonzero_u64("address_sync.global_gate_ttl_ms", self.global_gate_ttl_ms)?;
        ensure_nonzero_u64("address_sync.lookup_lock_ttl_ms", self.lookup_lock_ttl_ms)?;
        if self.full_gate_ttl_ms <= self.delta_gate_ttl_ms {
            return Err(ConfigError::Invalid(
                "address_sync.full_gate_ttl_ms must exceed delta_gate_ttl_ms".to_string(),
            ));
        }
        if self.full_retry_ttl_ms >= self.full_gate_ttl_ms {
            return Err(ConfigError::Invalid(
                "address_sync.full_retry_ttl_ms must be shorter than full_gate_ttl_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default registry page size.
const fn default_sync_page_size() -> usize {
    100
}

/// Returns the default device-address record TTL in milliseconds.
const fn default_record_ttl_ms() -> u64 {
    24 * 60 * 60 * 1_000
}

/// Returns the default full-reload gate TTL in milliseconds.
const fn default_full_gate_ttl_ms() -> u64 {
    25 * 60 * 60 * 1_000
}

/// Returns the default post-failure full-reload retry TTL in milliseconds.
const fn default_full_retry_ttl_ms() -> u64 {
    60 * 1_000
}

/// Returns the default delta-reload gate TTL in milliseconds.
const fn default_delta_gate_ttl_ms() -> u64 {
    5 * 60 * 1_000
}

/// Returns the default global-update gate TTL in milliseconds.
const fn default_global_gate_ttl_ms() -> u64 {
    5 * 60 * 1_000
}

/// Returns the default per-address lookup lease TTL in milliseconds.
const fn default_lookup_lock_ttl_ms() -> u64 {
    10_000
}

/// Returns the default synchronizer tick in milliseconds.
const fn default_sync_tick_ms() -> u64 {
    5 * 60 * 1_000
}

/// Lease-store backend selection.
///
/// # Invariants
/// - Exactly one backend is active; the memory backend carries no options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum LeaseStoreSection {
    /// Process-local in-memory backend (single-instance deployments, tests).
    #[default]
    Memory,
    /// Durable `SQLite` backend for instances sharing one host.
    Sqlite(SqliteLeaseStoreConfig),
}

impl LeaseStoreSection {
    /// Validates backend options.
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Memory => Ok(()),
            Self::Sqlite(config) => {
                if config.path.as_os_str().is_empty() {
                    return Err(ConfigError::Invalid(
                        "lease_store.path must not be empty".to_string(),
                    ));
                }
                ensure_nonzero_u64("lease_store.busy_timeout_ms", config.busy_timeout_ms)
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Checks an inclusive numeric range.
fn ensure_range_u64(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if (min ..= max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} out of range: {value} (expected {min}..={max})"
        )))
    }
}

/// Checks a non-zero duration field.
fn ensure_nonzero_u64(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::Invalid(format!("{field} must be greater than zero")))
    } else {
        Ok(())
    }
}

/// Resolves the configuration path from the argument, environment, or default.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(from_env) = env::var(CONFIG_ENV_VAR)
        && !from_env.is_empty()
    {
        return Ok(PathBuf::from(from_env));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates configuration paths for safety limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(
                "config path contains an overlong component".to_string(),
            ));
        }
    }
    Ok(())
}
