// crates/uplink-gate-core/src/core/time.rs
// ============================================================================
// Module: Uplink Gate Time Model
// Description: Canonical millisecond timestamps for records and reload marks.
// Purpose: Provide one explicit precision for registry timestamp comparisons.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Uplink Gate compares registry `last_updated` values to decide whether a
//! cached identity key is still valid and which twins a delta reload must
//! re-fetch. Those comparisons happen at exactly one precision: whole unix
//! milliseconds. RFC 3339 inputs are truncated to milliseconds at the parse
//! boundary, and two timestamps with equal truncated values are treated as
//! unchanged. Arbitration code never reads wall-clock time through this type;
//! store backends keep their own clocks for TTL bookkeeping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Timestamp parse errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum TimestampError {
    /// Input was not a valid RFC 3339 timestamp.
    #[error("invalid rfc3339 timestamp: {0}")]
    InvalidRfc3339(String),
    /// Input is outside the representable millisecond range.
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp in whole unix milliseconds.
///
/// # Invariants
/// - Sub-millisecond precision is discarded at construction; equality and
///   ordering operate on the truncated value only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Parses an RFC 3339 timestamp, truncating to whole milliseconds.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError`] when the input does not parse or does not
    /// fit the millisecond range.
    pub fn from_rfc3339(value: &str) -> Result<Self, TimestampError> {
        let parsed = OffsetDateTime::parse(value, &Rfc3339)
            .map_err(|err| TimestampError::InvalidRfc3339(err.to_string()))?;
        let millis = parsed.unix_timestamp_nanos() / 1_000_000;
        let millis = i64::try_from(millis)
            .map_err(|_| TimestampError::OutOfRange(value.to_string()))?;
        Ok(Self(millis))
    }

    /// Returns this timestamp advanced by the given number of milliseconds.
    #[must_use]
    pub const fn saturating_add_millis(self, millis: i64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// Returns true when `other` is strictly newer than `self`.
    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
