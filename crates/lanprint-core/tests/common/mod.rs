// Shared fakes for the agent and orchestrator integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use lanprint_api::command::report_topic;
use lanprint_api::{
    Channel, ChannelPeer, Connector, Endpoint, Error, LinkEvent, ProgressFn, TransferProgress,
    Uploader,
};
use lanprint_core::{Agent, AgentConfig, Device, DeviceCredentials};

/// Everything the fakes put "on the wire", in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Connect { device_id: String },
    Upload { device_id: String, remote_name: String, bytes: u64 },
    Publish { device_id: String, payload: String },
}

pub type WireLog = Arc<Mutex<Vec<Wire>>>;

// ── Message bus ─────────────────────────────────────────────────────

struct FakeLink {
    device_id: String,
    inbound: mpsc::Sender<LinkEvent>,
    shutdown: CancellationToken,
}

pub struct FakeConnector {
    wire: WireLog,
    delays: Mutex<VecDeque<Duration>>,
    fail: AtomicBool,
    reject_credentials: AtomicBool,
    links: Mutex<Vec<FakeLink>>,
}

impl FakeConnector {
    pub fn new(wire: WireLog) -> Self {
        Self {
            wire,
            delays: Mutex::new(VecDeque::new()),
            fail: AtomicBool::new(false),
            reject_credentials: AtomicBool::new(false),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Delay the next connect attempt by `delay`.
    pub fn delay_next(&self, delay: Duration) {
        self.delays.lock().push_back(delay);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Answer connects the way a printer refusing the access code does.
    pub fn set_rejecting_credentials(&self, reject: bool) {
        self.reject_credentials.store(reject, Ordering::SeqCst);
    }

    /// Links for `device_id` nobody has shut down yet.
    pub fn live_links(&self, device_id: &str) -> usize {
        self.links
            .lock()
            .iter()
            .filter(|l| l.device_id == device_id && !l.shutdown.is_cancelled())
            .count()
    }

    /// Deliver a report on the device's newest live link.
    pub async fn inject(&self, device_id: &str, payload: &str) {
        let sender = self.newest(device_id).expect("no live link").inbound;
        sender
            .send(LinkEvent::Message {
                topic: report_topic(device_id),
                payload: Bytes::copy_from_slice(payload.as_bytes()),
            })
            .await
            .unwrap();
    }

    /// Simulate the broker dropping the device's newest live link.
    pub async fn drop_link(&self, device_id: &str, reason: &str) {
        let link = self.newest(device_id).expect("no live link");
        link.inbound
            .send(LinkEvent::Closed {
                reason: Some(reason.to_owned()),
            })
            .await
            .unwrap();
        link.shutdown.cancel();
    }

    fn newest(&self, device_id: &str) -> Option<FakeLinkRef> {
        self.links
            .lock()
            .iter()
            .rev()
            .find(|l| l.device_id == device_id && !l.shutdown.is_cancelled())
            .map(|l| FakeLinkRef {
                inbound: l.inbound.clone(),
                shutdown: l.shutdown.clone(),
            })
    }
}

struct FakeLinkRef {
    inbound: mpsc::Sender<LinkEvent>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Channel, Error> {
        self.wire.lock().push(Wire::Connect {
            device_id: endpoint.device_id.clone(),
        });

        let delay = self.delays.lock().pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_credentials.load(Ordering::SeqCst) {
            return Err(Error::Authentication {
                message: "bad user name or password".into(),
            });
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Connect {
                address: endpoint.address.clone(),
                reason: "connection refused".into(),
            });
        }

        let (channel, peer) = Channel::pair(16);
        let ChannelPeer {
            mut outbound,
            inbound,
            shutdown,
        } = peer;

        let wire = Arc::clone(&self.wire);
        let device_id = endpoint.device_id.clone();
        let drain_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = drain_shutdown.cancelled() => break,
                    msg = outbound.recv() => match msg {
                        Some(msg) => wire.lock().push(Wire::Publish {
                            device_id: device_id.clone(),
                            payload: String::from_utf8_lossy(&msg.payload).into_owned(),
                        }),
                        None => break,
                    },
                }
            }
        });

        self.links.lock().push(FakeLink {
            device_id: endpoint.device_id.clone(),
            inbound,
            shutdown,
        });
        Ok(channel)
    }
}

// ── File channel ────────────────────────────────────────────────────

pub struct FakeUploader {
    wire: WireLog,
    fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl FakeUploader {
    pub fn new(wire: WireLog) -> Self {
        Self {
            wire,
            fail: AtomicBool::new(false),
            delay: Mutex::new(None),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(
        &self,
        endpoint: &Endpoint,
        local_path: &Path,
        remote_name: &str,
        progress: Option<ProgressFn>,
    ) -> Result<u64, Error> {
        let data = tokio::fs::read(local_path).await?;
        let total = u64::try_from(data.len()).unwrap();

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Ftp {
                code: 553,
                message: "Could not create file.".into(),
            });
        }

        if let Some(progress) = &progress {
            progress(TransferProgress { sent: total / 2, total });
            progress(TransferProgress { sent: total, total });
        }
        self.wire.lock().push(Wire::Upload {
            device_id: endpoint.device_id.clone(),
            remote_name: remote_name.to_owned(),
            bytes: total,
        });
        Ok(total)
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub agent: Agent,
    pub wire: WireLog,
    pub connector: Arc<FakeConnector>,
    pub uploader: Arc<FakeUploader>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AgentConfig::default())
    }

    pub fn with_config(config: AgentConfig) -> Self {
        let wire: WireLog = Arc::new(Mutex::new(Vec::new()));
        let connector = Arc::new(FakeConnector::new(Arc::clone(&wire)));
        let uploader = Arc::new(FakeUploader::new(Arc::clone(&wire)));
        let agent = Agent::with_transports(
            config,
            Arc::clone(&connector) as Arc<dyn Connector>,
            Arc::clone(&uploader) as Arc<dyn Uploader>,
        );
        Self {
            agent,
            wire,
            connector,
            uploader,
        }
    }

    pub fn wire(&self) -> Vec<Wire> {
        self.wire.lock().clone()
    }

    pub fn publishes(&self) -> Vec<(String, serde_json::Value)> {
        self.wire
            .lock()
            .iter()
            .filter_map(|w| match w {
                Wire::Publish { device_id, payload } => {
                    Some((device_id.clone(), serde_json::from_str(payload).unwrap()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> usize {
        self.wire
            .lock()
            .iter()
            .filter(|w| matches!(w, Wire::Upload { .. }))
            .count()
    }
}

pub fn device(id: &str) -> Device {
    Device::new(id, "10.0.0.5", DeviceCredentials::new("bblp", "pw"), true)
}

/// Poll `check` until it holds or roughly two seconds of (possibly paused)
/// time went by.
pub async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// A sliced project on disk.
pub fn artifact(bytes: usize) -> tempfile::NamedTempFile {
    use std::io::Write;

    let mut file = tempfile::Builder::new().suffix(".3mf").tempfile().unwrap();
    file.write_all(&vec![0x5a; bytes]).unwrap();
    file.flush().unwrap();
    file
}
