// Transport seams between the core and the wire.
//
// A `Connector` opens a message-bus `Channel` to one printer; an `Uploader`
// pushes one file to it. The MQTT and FTPS implementations live in sibling
// modules. The core only ever talks to these traits.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::tls::TlsMode;

/// Default printer account for LAN mode.
pub const DEFAULT_USERNAME: &str = "bblp";

// ── Endpoint ─────────────────────────────────────────────────────────

/// Whether the link is wrapped in TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSecurity {
    Tls(TlsMode),
    Plain,
}

impl TransportSecurity {
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// Everything needed to reach one printer.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Printer serial; also the MQTT topic namespace.
    pub device_id: String,
    /// Host name or IP address.
    pub address: String,
    pub username: String,
    /// LAN access code.
    pub password: SecretString,
    pub security: TransportSecurity,
}

// ── Message bus ──────────────────────────────────────────────────────

/// Delivery assurance requested for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityOfService {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QualityOfService {
    /// Map the integer level used at the host boundary. Out-of-range values clamp.
    pub fn from_level(level: i32) -> Self {
        match level {
            i32::MIN..=0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            _ => Self::ExactlyOnce,
        }
    }
}

impl From<QualityOfService> for rumqttc::QoS {
    fn from(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => Self::AtMostOnce,
            QualityOfService::AtLeastOnce => Self::AtLeastOnce,
            QualityOfService::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// A message queued for the printer's request topic.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub payload: Bytes,
    pub qos: QualityOfService,
}

/// Something that happened on an open link.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A payload arrived on a subscribed topic.
    Message { topic: String, payload: Bytes },
    /// The link dropped. No further events follow.
    Closed { reason: Option<String> },
}

/// Core-facing half of an open link.
///
/// Dropping `outbound` or cancelling `shutdown` tears the link down.
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<LinkEvent>,
    pub shutdown: CancellationToken,
}

/// Wire-facing half of an open link, held by the transport task.
#[derive(Debug)]
pub struct ChannelPeer {
    pub outbound: mpsc::Receiver<Outbound>,
    pub inbound: mpsc::Sender<LinkEvent>,
    pub shutdown: CancellationToken,
}

impl Channel {
    /// Create both halves of a link with the given queue depth per direction.
    pub fn pair(capacity: usize) -> (Self, ChannelPeer) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();

        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
                shutdown: shutdown.clone(),
            },
            ChannelPeer {
                outbound: out_rx,
                inbound: in_tx,
                shutdown,
            },
        )
    }
}

/// Opens authenticated message-bus links.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect, authenticate and subscribe to the printer's report topic.
    ///
    /// Resolves once the broker acknowledged the session. Callers bound
    /// this with their own timeout.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Channel, Error>;
}

// ── File channel ─────────────────────────────────────────────────────

/// Bytes pushed so far for one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub sent: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = self.sent.saturating_mul(100) / self.total;
        u8::try_from(pct.min(100)).unwrap_or(100)
    }
}

/// Optional progress side channel. Called inline from the upload loop.
pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Pushes build artifacts to a printer's storage.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Upload `local_path` as `remote_name`. Returns the byte count written.
    async fn upload(
        &self,
        endpoint: &Endpoint,
        local_path: &Path,
        remote_name: &str,
        progress: Option<ProgressFn>,
    ) -> Result<u64, Error>;
}
