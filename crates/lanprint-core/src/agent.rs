// ── Agent facade ──
//
// Async entry point that ties the registry, the transports, the
// orchestrator and the dispatcher together. Cheap to clone; every clone
// drives the same set of printers.

use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use lanprint_api::{
    ArrivalNotice, Channel, Connector, FtpsUploader, LinkEvent, MqttConnector, PrinterInfo,
    QualityOfService, Uploader,
};

use crate::config::{AgentConfig, TlsVerification};
use crate::dispatch::Dispatcher;
use crate::error::CoreError;
use crate::model::{ConnectStatus, Device, ReportSummary, SessionState};
use crate::orchestrator::{
    JobHooks, Orchestrator, PrintOutcome, PrintRequest, TransferJob, TransferRequest,
};
use crate::registry::DeviceRegistry;
use crate::session::Session;

/// The main entry point for consumers.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: ArcSwap<AgentConfig>,
    registry: DeviceRegistry,
    dispatcher: Dispatcher,
    connector: Arc<dyn Connector>,
    uploader: Arc<dyn Uploader>,
    /// Cancelled on shutdown; parent of every background task token.
    cancel: CancellationToken,
    discovery: Mutex<Option<CancellationToken>>,
    static_printers: Mutex<Vec<PrinterInfo>>,
}

impl Agent {
    /// Agent backed by the MQTT and FTPS transports.
    pub fn new(config: AgentConfig) -> Self {
        let connector =
            MqttConnector::new(config.keep_alive).with_capacity(config.channel_capacity);
        let uploader = FtpsUploader::new(config.connect_timeout);
        Self::with_transports(config, Arc::new(connector), Arc::new(uploader))
    }

    /// Agent backed by caller-supplied transports.
    pub fn with_transports(
        config: AgentConfig,
        connector: Arc<dyn Connector>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                config: ArcSwap::from_pointee(config),
                registry: DeviceRegistry::new(),
                dispatcher: Dispatcher::new(),
                connector,
                uploader,
                cancel: CancellationToken::new(),
                discovery: Mutex::new(None),
                static_printers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> Arc<AgentConfig> {
        self.inner.config.load_full()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Switch TLS verification for future connects and uploads.
    pub fn set_tls(&self, tls: TlsVerification) {
        self.inner.config.rcu(|current| {
            let mut next = AgentConfig::clone(current);
            next.tls = tls.clone();
            next
        });
    }

    // ── Sessions ─────────────────────────────────────────────────────

    /// Open a session to `device`, superseding any earlier one.
    ///
    /// Resolves once the printer accepted the session. A connect that loses
    /// the race against a newer one returns `Superseded` and leaves no link
    /// behind.
    pub async fn connect(&self, device: Device) -> Result<(), CoreError> {
        device.validate()?;
        let config = self.config();
        let device_id = device.id.clone();
        let endpoint = device.endpoint(&config.tls);

        let (session, previous) = self.inner.registry.begin_session(device);
        if let Some(previous) = previous {
            debug!(
                device_id = %device_id,
                generation = previous.generation(),
                "superseding previous session"
            );
            previous.close();
        }

        info!(
            device_id = %device_id,
            address = %endpoint.address,
            tls = endpoint.security.is_tls(),
            "connecting"
        );

        let attempt =
            tokio::time::timeout(config.connect_timeout, self.inner.connector.connect(&endpoint))
                .await;
        let channel = match attempt {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                let err = CoreError::connect(&device_id, &e);
                return Err(self.connect_failed(&session, &config, err));
            }
            Err(_) => {
                let err = CoreError::ConnectFailed {
                    device_id: device_id.clone(),
                    reason: format!("timed out after {}s", config.connect_timeout.as_secs()),
                };
                return Err(self.connect_failed(&session, &config, err));
            }
        };

        let Channel {
            outbound,
            inbound,
            shutdown,
        } = channel;

        if !self.inner.registry.attach_if_current(
            &device_id,
            session.generation(),
            outbound,
            shutdown.clone(),
        ) {
            shutdown.cancel();
            debug!(
                device_id = %device_id,
                generation = session.generation(),
                "discarding late connect"
            );
            return Err(CoreError::Superseded { device_id });
        }

        info!(device_id = %device_id, generation = session.generation(), "connected");
        self.inner
            .dispatcher
            .connected(ConnectStatus::Connected, &device_id, "Connected");
        self.spawn_forwarder(&session, inbound);
        Ok(())
    }

    fn connect_failed(&self, session: &Session, config: &AgentConfig, err: CoreError) -> CoreError {
        let device_id = session.device_id().to_owned();
        if !self.inner.registry.clear_if_current(&device_id, session.generation()) {
            debug!(device_id = %device_id, "connect failed after being superseded");
            return CoreError::Superseded { device_id };
        }
        session.close();

        warn!(device_id = %device_id, error = %err, "connect failed");
        if config.report_connect_failures {
            self.inner
                .dispatcher
                .connected(ConnectStatus::Failed, &device_id, &err.to_string());
        }
        err
    }

    /// One task per session: keeps inbound order and notices link loss.
    fn spawn_forwarder(&self, session: &Arc<Session>, mut inbound: mpsc::Receiver<LinkEvent>) {
        let agent = self.clone();
        let session = Arc::clone(session);
        let closed = session.closed_token();
        let cancel = self.inner.cancel.clone();

        tokio::spawn(async move {
            let device_id = session.device_id().to_owned();
            let generation = session.generation();

            let reason = loop {
                let event = tokio::select! {
                    biased;
                    () = closed.cancelled() => return,
                    () = cancel.cancelled() => return,
                    event = inbound.recv() => event,
                };
                match event {
                    Some(LinkEvent::Message { topic, payload }) => {
                        trace!(
                            device_id = %device_id,
                            topic = %topic,
                            bytes = payload.len(),
                            "report"
                        );
                        agent.inner.registry.record_report(&device_id, generation, &payload);
                        agent
                            .inner
                            .dispatcher
                            .message(&device_id, String::from_utf8_lossy(&payload).into_owned());
                    }
                    Some(LinkEvent::Closed { reason }) => {
                        break reason.unwrap_or_else(|| "connection closed".into());
                    }
                    None => break "connection closed".into(),
                }
            };

            if agent.inner.registry.clear_if_current(&device_id, generation) {
                session.mark_lost();
                warn!(device_id = %device_id, reason = %reason, "connection lost");
                agent
                    .inner
                    .dispatcher
                    .connected(ConnectStatus::Lost, &device_id, &reason);
            }
        });
    }

    /// Close the device's session and forget it. Always succeeds.
    pub fn disconnect(&self, device_id: &str) {
        match self.inner.registry.remove(device_id) {
            Some(session) => {
                session.close();
                info!(device_id = %device_id, "disconnected");
            }
            None => debug!(device_id = %device_id, "disconnect of unknown printer"),
        }
    }

    /// Queue a raw payload on the device's request topic.
    pub fn publish(
        &self,
        device_id: &str,
        payload: Bytes,
        qos: QualityOfService,
    ) -> Result<u64, CoreError> {
        self.inner.registry.connected_session(device_id)?.publish(payload, qos)
    }

    /// Like [`publish`](Self::publish), but rejects text that is not JSON.
    pub fn publish_json(
        &self,
        device_id: &str,
        json: &str,
        qos: QualityOfService,
    ) -> Result<u64, CoreError> {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|e| CoreError::invalid(format!("message is not JSON: {e}")))?;
        self.publish(device_id, Bytes::copy_from_slice(json.as_bytes()), qos)
    }

    pub fn session_state(&self, device_id: &str) -> SessionState {
        self.inner
            .registry
            .session(device_id)
            .map_or(SessionState::Disconnected, |s| s.state())
    }

    pub fn last_report(&self, device_id: &str) -> Option<serde_json::Value> {
        self.inner.registry.last_report(device_id)
    }

    pub fn summary(&self, device_id: &str) -> Option<ReportSummary> {
        self.inner.registry.summary(device_id)
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    /// Upload the artifact and start printing it.
    pub async fn start_print(
        &self,
        request: PrintRequest,
        hooks: &JobHooks,
    ) -> Result<PrintOutcome, CoreError> {
        let config = self.config();
        self.orchestrator(&config).print(request, hooks).await
    }

    /// Upload the artifact to the printer's storage without starting it.
    pub async fn send_to_storage(
        &self,
        request: TransferRequest,
        hooks: &JobHooks,
    ) -> Result<TransferJob, CoreError> {
        let config = self.config();
        self.orchestrator(&config).transfer(request, hooks).await
    }

    fn orchestrator<'a>(&'a self, config: &'a AgentConfig) -> Orchestrator<'a> {
        Orchestrator {
            registry: &self.inner.registry,
            uploader: self.inner.uploader.as_ref(),
            config,
        }
    }

    // ── Discovery ────────────────────────────────────────────────────

    /// One SSDP search, plus the static printers that did not answer it.
    pub async fn discover(&self) -> Result<Vec<PrinterInfo>, CoreError> {
        let window = self.config().discovery_window;
        let found = lanprint_api::discovery::discover(window).await?;
        let statics = self.inner.static_printers.lock().clone();
        Ok(with_static(found, &statics))
    }

    /// Printers announced on every discovery round without being searched for.
    pub fn set_static_printers(&self, printers: Vec<PrinterInfo>) {
        *self.inner.static_printers.lock() = printers;
    }

    /// Begin continuous discovery. A running loop is left alone.
    pub fn start_discovery(&self) {
        let token = {
            let mut slot = self.inner.discovery.lock();
            if slot.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return;
            }
            let token = self.inner.cancel.child_token();
            *slot = Some(token.clone());
            token
        };

        let agent = self.clone();
        tokio::spawn(async move {
            info!("discovery started");
            loop {
                agent.announce_static();
                let config = agent.config();
                tokio::select! {
                    () = token.cancelled() => break,
                    found = lanprint_api::discovery::discover(config.discovery_window) => {
                        match found {
                            Ok(printers) => {
                                for printer in &printers {
                                    agent.announce(printer);
                                }
                            }
                            Err(e) => warn!(error = %e, "discovery round failed"),
                        }
                    }
                }
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(config.discovery_interval) => {}
                }
            }
            info!("discovery stopped");
        });
    }

    pub fn stop_discovery(&self) {
        if let Some(token) = self.inner.discovery.lock().take() {
            token.cancel();
        }
    }

    fn announce_static(&self) {
        let printers = self.inner.static_printers.lock().clone();
        for printer in &printers {
            self.announce(printer);
        }
    }

    fn announce(&self, printer: &PrinterInfo) {
        match serde_json::to_string(&ArrivalNotice::from(printer)) {
            Ok(json) => self.inner.dispatcher.printer_arrived(json),
            Err(e) => warn!(serial = %printer.serial, error = %e, "cannot encode arrival notice"),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Stop background tasks and close every session.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.stop_discovery();
        let sessions = self.inner.registry.drain();
        if !sessions.is_empty() {
            debug!(count = sessions.len(), "closing sessions");
        }
        for session in sessions {
            session.close();
        }
    }
}

/// Search results first; static entries fill in serials nobody answered for.
fn with_static(mut found: Vec<PrinterInfo>, statics: &[PrinterInfo]) -> Vec<PrinterInfo> {
    for printer in statics {
        if !found.iter().any(|p| p.serial == printer.serial) {
            found.push(printer.clone());
        }
    }
    found
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("devices", &self.inner.registry.device_ids())
            .finish_non_exhaustive()
    }
}
