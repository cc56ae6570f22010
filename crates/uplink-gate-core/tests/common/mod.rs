// crates/uplink-gate-core/tests/common/mod.rs
// ============================================================================
// Module: Shared Test Fixtures
// Description: Fake registry and channel implementations for core tests.
// ============================================================================
//! ## Overview
//! Deterministic in-memory fakes for the collaborator interfaces.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    reason = "Test-only fixtures; not every test uses every helper."
)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use serde_json::Value;
use uplink_gate_core::Broadcaster;
use uplink_gate_core::BroadcastError;
use uplink_gate_core::CancelToken;
use uplink_gate_core::DevAddr;
use uplink_gate_core::DeviceId;
use uplink_gate_core::DeviceIdentity;
use uplink_gate_core::DeviceTwin;
use uplink_gate_core::GatewayId;
use uplink_gate_core::IdentityRegistry;
use uplink_gate_core::InvocationReply;
use uplink_gate_core::InvokeError;
use uplink_gate_core::MethodInvoker;
use uplink_gate_core::RegistryError;
use uplink_gate_core::Timestamp;
use uplink_gate_core::TwinFilter;
use uplink_gate_core::TwinPage;
use uplink_gate_core::TwinProperties;

/// Builds a twin with a reported address, gateway, and key.
pub fn twin(
    device: &str,
    addr: &str,
    gateway: Option<&str>,
    key: Option<&str>,
    updated_millis: i64,
) -> DeviceTwin {
    DeviceTwin {
        device_id: DeviceId::new(device),
        desired: TwinProperties::default(),
        reported: TwinProperties {
            dev_addr: Some(DevAddr::new(addr)),
            gateway_id: gateway.map(GatewayId::new),
            network_key: key.map(str::to_string),
        },
        last_updated: Timestamp::from_unix_millis(updated_millis),
    }
}

/// In-memory identity registry with a query-invocation counter.
#[derive(Default)]
pub struct FakeRegistry {
    /// Twins by device identifier.
    twins: Mutex<BTreeMap<String, DeviceTwin>>,
    /// Identity secrets by device identifier.
    identities: Mutex<BTreeMap<String, String>>,
    /// Number of `query_twins` invocations (each page counts once).
    query_count: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_twin(&self, twin: DeviceTwin) {
        self.twins
            .lock()
            .unwrap()
            .insert(twin.device_id.to_string(), twin);
    }

    pub fn insert_identity(&self, device: &str, key: &str) {
        self.identities
            .lock()
            .unwrap()
            .insert(device.to_string(), key.to_string());
    }

    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }
}

impl IdentityRegistry for FakeRegistry {
    fn get_identity(
        &self,
        device_id: &DeviceId,
        _cancel: &CancelToken,
    ) -> Result<Option<DeviceIdentity>, RegistryError> {
        Ok(self
            .identities
            .lock()
            .unwrap()
            .get(device_id.as_str())
            .map(|key| DeviceIdentity {
                network_key: key.clone(),
            }))
    }

    fn get_twin(
        &self,
        device_id: &DeviceId,
        _cancel: &CancelToken,
    ) -> Result<Option<DeviceTwin>, RegistryError> {
        Ok(self.twins.lock().unwrap().get(device_id.as_str()).cloned())
    }

    fn query_twins(
        &self,
        filter: &TwinFilter,
        page_size: usize,
        continuation: Option<&str>,
        _cancel: &CancelToken,
    ) -> Result<TwinPage, RegistryError> {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        let matching: Vec<DeviceTwin> = self
            .twins
            .lock()
            .unwrap()
            .values()
            .filter(|twin| match filter {
                TwinFilter::All => twin.dev_addr().is_some(),
                TwinFilter::ByDevAddr(addr) => twin.dev_addr() == Some(addr),
                TwinFilter::UpdatedSince(mark) => mark.is_before(twin.last_updated),
            })
            .cloned()
            .collect();
        let offset: usize = continuation.map_or(0, |token| token.parse().unwrap_or(0));
        let page: Vec<DeviceTwin> =
            matching.iter().skip(offset).take(page_size).cloned().collect();
        let next = offset + page.len();
        let continuation = (next < matching.len()).then(|| next.to_string());
        Ok(TwinPage {
            twins: page,
            continuation,
        })
    }
}

/// Direct-invocation fake recording every call.
#[derive(Default)]
pub struct FakeInvoker {
    /// Recorded (gateway, method) pairs.
    pub calls: Mutex<Vec<(String, String)>>,
    /// Gateways that answer with a failure status.
    pub failing: Mutex<Vec<String>>,
}

impl FakeInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, gateway: &str) {
        self.failing.lock().unwrap().push(gateway.to_string());
    }
}

impl MethodInvoker for FakeInvoker {
    fn invoke(
        &self,
        gateway_id: &GatewayId,
        method: &str,
        _payload: &Value,
        _cancel: &CancelToken,
    ) -> Result<InvocationReply, InvokeError> {
        self.calls
            .lock()
            .unwrap()
            .push((gateway_id.to_string(), method.to_string()));
        let status = if self.failing.lock().unwrap().contains(&gateway_id.to_string()) {
            500
        } else {
            200
        };
        Ok(InvocationReply {
            status,
            payload: None,
        })
    }
}

/// Broadcast fake recording every publish.
#[derive(Default)]
pub struct FakeBroadcaster {
    /// Recorded (topic, message) pairs.
    pub published: Mutex<Vec<(String, String)>>,
}

impl FakeBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Broadcaster for FakeBroadcaster {
    fn publish(&self, topic: &str, message: &str) -> Result<(), BroadcastError> {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), message.to_string()));
        Ok(())
    }
}
