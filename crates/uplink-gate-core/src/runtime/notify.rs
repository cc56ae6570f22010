// crates/uplink-gate-core/src/runtime/notify.rs
// ============================================================================
// Module: Cache Reset Notifier
// Description: Administrative cache reset with gateway fan-out.
// Purpose: Clear device state unconditionally and tell every gateway.
// Dependencies: crate::core, crate::interfaces, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The administrative reset bypasses the lease discipline used everywhere
//! else: it deletes the device counter record unconditionally, then notifies
//! gateways so their local caches drop the device too. Registry-managed
//! gateways get a direct method invocation; the broadcast channel covers the
//! rest. Per-target delivery failures are reported in the result, never
//! raised, so one unreachable gateway cannot block the reset.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::core::identifiers::DeviceId;
use crate::core::identifiers::GatewayId;
use crate::core::records::counter_key;
use crate::interfaces::Broadcaster;
use crate::interfaces::CancelToken;
use crate::interfaces::LeaseStore;
use crate::interfaces::MethodInvoker;
use crate::interfaces::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Method name invoked on gateways to drop a device from their caches.
pub const CACHE_RESET_METHOD: &str = "clear-device-cache";
/// Broadcast topic carrying cache-reset notifications.
pub const CACHE_RESET_TOPIC: &str = "uplink-gate/cache-reset";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Cache reset faults.
///
/// # Invariants
/// - Delivery failures are not faults; they land in [`CacheResetReport`].
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Lease store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// SECTION: Report
// ============================================================================

/// Delivery report for one administrative cache reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResetReport {
    /// Device whose record was cleared.
    pub device_id: DeviceId,
    /// Gateways that acknowledged the direct invocation.
    pub notified: Vec<GatewayId>,
    /// Gateways whose direct invocation failed, with the failure text.
    pub failed: Vec<(GatewayId, String)>,
    /// True when the broadcast was handed off.
    pub broadcast: bool,
}

// ============================================================================
// SECTION: Notifier
// ============================================================================

/// Administrative cache reset with gateway fan-out.
pub struct CacheResetNotifier {
    /// Shared lease store.
    store: Arc<dyn LeaseStore>,
    /// Direct-invocation channel to registry-managed gateways.
    invoker: Arc<dyn MethodInvoker>,
    /// Broadcast channel for gateways without a direct channel.
    broadcaster: Arc<dyn Broadcaster>,
}

impl CacheResetNotifier {
    /// Creates a notifier over the given channels.
    #[must_use]
    pub fn new(
        store: Arc<dyn LeaseStore>,
        invoker: Arc<dyn MethodInvoker>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            invoker,
            broadcaster,
        }
    }

    /// Clears the device counter record and fans the reset out.
    ///
    /// The delete ignores lease ownership: this is the administrative
    /// override, not an arbitration path.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when the store delete fails; notification
    /// failures are reported in the returned [`CacheResetReport`].
    pub fn reset_device_cache(
        &self,
        device_id: &DeviceId,
        gateways: &[GatewayId],
        cancel: &CancelToken,
    ) -> Result<CacheResetReport, NotifyError> {
        self.store.delete(&counter_key(device_id))?;
        let payload = json!({ "device_id": device_id });
        let mut notified = Vec::new();
        let mut failed = Vec::new();
        for gateway in gateways {
            match self.invoker.invoke(gateway, CACHE_RESET_METHOD, &payload, cancel) {
                Ok(reply) if (200 .. 300).contains(&reply.status) => {
                    notified.push(gateway.clone());
                }
                Ok(reply) => {
                    failed.push((gateway.clone(), format!("status {}", reply.status)));
                }
                Err(err) => {
                    failed.push((gateway.clone(), err.to_string()));
                }
            }
        }
        let broadcast = self
            .broadcaster
            .publish(CACHE_RESET_TOPIC, device_id.as_str())
            .is_ok();
        Ok(CacheResetReport {
            device_id: device_id.clone(),
            notified,
            failed,
            broadcast,
        })
    }
}
