// ── Device registry ──
//
// Single source of truth for which printers the agent knows and which
// session currently speaks for each. Every session swap happens under the
// device's map entry, so two connect attempts can never both end up live.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use lanprint_api::Outbound;

use crate::error::CoreError;
use crate::model::{Device, ReportSummary, merge_report};
use crate::session::Session;

struct DeviceEntry {
    device: Device,
    session: Option<Arc<Session>>,
    report: Option<serde_json::Value>,
    last_message_at: Option<DateTime<Utc>>,
}

/// Thread-safe map of device id to device, session and last report.
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceEntry>,
    generation: AtomicU64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Upsert `device` and install a fresh `Connecting` session for it.
    ///
    /// Returns the new session and the one it replaced, if any. The caller
    /// must close the replaced session.
    pub(crate) fn begin_session(&self, device: Device) -> (Arc<Session>, Option<Arc<Session>>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Arc::new(Session::new(device.id.clone(), generation));

        let mut entry = self
            .devices
            .entry(device.id.clone())
            .or_insert_with(|| DeviceEntry {
                device: device.clone(),
                session: None,
                report: None,
                last_message_at: None,
            });
        entry.device = device;
        let previous = entry.session.replace(Arc::clone(&session));

        debug!(device_id = %session.device_id(), generation, "session created");
        (session, previous)
    }

    /// Attach a live link to session `generation` if it is still current.
    ///
    /// On `false` the caller owns the link and must shut it down.
    pub(crate) fn attach_if_current(
        &self,
        device_id: &str,
        generation: u64,
        outbound: mpsc::Sender<Outbound>,
        shutdown: CancellationToken,
    ) -> bool {
        let Some(entry) = self.devices.get(device_id) else {
            return false;
        };
        match &entry.session {
            Some(session) if session.generation() == generation => {
                session.attach(outbound, shutdown);
                session.is_connected()
            }
            _ => false,
        }
    }

    /// Detach session `generation` if it is still current. Returns whether it was.
    pub(crate) fn clear_if_current(&self, device_id: &str, generation: u64) -> bool {
        let Some(mut entry) = self.devices.get_mut(device_id) else {
            return false;
        };
        if entry
            .session
            .as_ref()
            .is_some_and(|s| s.generation() == generation)
        {
            entry.session = None;
            true
        } else {
            false
        }
    }

    /// Forget a device. Returns its session so the caller can close it.
    pub fn remove(&self, device_id: &str) -> Option<Arc<Session>> {
        self.devices
            .remove(device_id)
            .and_then(|(_, entry)| entry.session)
    }

    /// Forget every device. Returns the sessions that were attached.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub fn session(&self, device_id: &str) -> Option<Arc<Session>> {
        self.devices
            .get(device_id)
            .and_then(|e| e.session.clone())
    }

    /// The device's session, if it is `Connected`.
    pub fn connected_session(&self, device_id: &str) -> Result<Arc<Session>, CoreError> {
        self.session(device_id)
            .filter(|s| s.is_connected())
            .ok_or_else(|| CoreError::NotConnected {
                device_id: device_id.to_owned(),
            })
    }

    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.devices.get(device_id).map(|e| e.device.clone())
    }

    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.devices.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    // ── Reports ──────────────────────────────────────────────────────

    /// Merge an inbound report into the device's last-known state.
    ///
    /// Non-JSON payloads only bump the timestamp.
    pub(crate) fn record_report(&self, device_id: &str, generation: u64, payload: &[u8]) {
        let Some(mut entry) = self.devices.get_mut(device_id) else {
            return;
        };
        if !entry
            .session
            .as_ref()
            .is_some_and(|s| s.generation() == generation)
        {
            return;
        }

        entry.last_message_at = Some(Utc::now());
        match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(delta) => match entry.report.as_mut() {
                Some(report) => merge_report(report, delta),
                None => entry.report = Some(delta),
            },
            Err(e) => trace!(device_id, error = %e, "report is not JSON"),
        }
    }

    pub fn last_report(&self, device_id: &str) -> Option<serde_json::Value> {
        self.devices.get(device_id).and_then(|e| e.report.clone())
    }

    pub fn summary(&self, device_id: &str) -> Option<ReportSummary> {
        self.devices
            .get(device_id)
            .and_then(|e| e.report.as_ref().map(ReportSummary::from_report))
    }

    pub fn last_message_at(&self, device_id: &str) -> Option<DateTime<Utc>> {
        self.devices.get(device_id).and_then(|e| e.last_message_at)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceCredentials;
    use crate::model::SessionState;

    fn device(id: &str) -> Device {
        Device::new(id, "10.0.0.5", DeviceCredentials::access_code("pw"), true)
    }

    fn link() -> (mpsc::Sender<Outbound>, mpsc::Receiver<Outbound>, CancellationToken) {
        let (tx, rx) = mpsc::channel(4);
        (tx, rx, CancellationToken::new())
    }

    #[test]
    fn newer_session_replaces_older() {
        let registry = DeviceRegistry::new();
        let (first, prev) = registry.begin_session(device("P1"));
        assert!(prev.is_none());

        let (second, prev) = registry.begin_session(device("P1"));
        assert_eq!(prev.map(|s| s.generation()), Some(first.generation()));
        assert!(second.generation() > first.generation());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_generation_cannot_attach() {
        let registry = DeviceRegistry::new();
        let (first, _) = registry.begin_session(device("P1"));
        let (second, _) = registry.begin_session(device("P1"));

        let (tx, _rx, shutdown) = link();
        assert!(!registry.attach_if_current("P1", first.generation(), tx, shutdown));
        assert_eq!(first.state(), SessionState::Connecting);

        let (tx, _rx, shutdown) = link();
        assert!(registry.attach_if_current("P1", second.generation(), tx, shutdown));
        assert!(registry.connected_session("P1").is_ok());
    }

    #[test]
    fn clear_only_touches_current_generation() {
        let registry = DeviceRegistry::new();
        let (first, _) = registry.begin_session(device("P1"));
        let (second, _) = registry.begin_session(device("P1"));

        assert!(!registry.clear_if_current("P1", first.generation()));
        assert!(registry.session("P1").is_some());
        assert!(registry.clear_if_current("P1", second.generation()));
        assert!(registry.session("P1").is_none());
        assert!(registry.device("P1").is_some());
    }

    #[test]
    fn remove_returns_session_and_forgets_device() {
        let registry = DeviceRegistry::new();
        let (session, _) = registry.begin_session(device("P1"));

        let removed = registry.remove("P1").unwrap();
        assert_eq!(removed.generation(), session.generation());
        assert!(registry.device("P1").is_none());
        assert!(registry.remove("P1").is_none());
    }

    #[test]
    fn reports_merge_for_current_session_only() {
        let registry = DeviceRegistry::new();
        let (first, _) = registry.begin_session(device("P1"));
        registry.record_report(
            "P1",
            first.generation(),
            br#"{"print":{"gcode_state":"RUNNING","mc_percent":10}}"#,
        );
        registry.record_report("P1", first.generation(), br#"{"print":{"mc_percent":20}}"#);
        registry.record_report("P1", first.generation() + 99, br#"{"print":{"mc_percent":99}}"#);

        let summary = registry.summary("P1").unwrap();
        assert_eq!(summary.gcode_state.as_deref(), Some("RUNNING"));
        assert_eq!(summary.percent, Some(20));
        assert!(registry.last_message_at("P1").is_some());
    }
}
