// ── Transport session ──
//
// One session per connect attempt. A session starts `Connecting`, becomes
// `Connected` once the registry attaches a live link to it, and ends
// `Disconnected`. It never comes back: a reconnect creates a new session.

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use lanprint_api::{Outbound, QualityOfService};

use crate::error::CoreError;
use crate::model::SessionState;

/// Outbound half of a live link plus the message counter.
///
/// Kept behind one lock so sequence ids and queue order agree.
struct LinkHalf {
    outbound: mpsc::Sender<Outbound>,
    shutdown: CancellationToken,
    sequence: u64,
}

pub struct Session {
    device_id: String,
    generation: u64,
    state: Mutex<SessionState>,
    link: Mutex<Option<LinkHalf>>,
    /// Cancelled on explicit close; the inbound forwarder watches it.
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(device_id: impl Into<String>, generation: u64) -> Self {
        Self {
            device_id: device_id.into(),
            generation,
            state: Mutex::new(SessionState::Connecting),
            link: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Monotonic id of the connect attempt that created this session.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Number of messages published so far.
    pub fn sequence(&self) -> u64 {
        self.link.lock().as_ref().map_or(0, |l| l.sequence)
    }

    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Install the live link. Only the registry calls this, under its entry lock.
    pub(crate) fn attach(&self, outbound: mpsc::Sender<Outbound>, shutdown: CancellationToken) {
        let mut link = self.link.lock();
        if self.closed.is_cancelled() {
            shutdown.cancel();
            return;
        }
        *link = Some(LinkHalf {
            outbound,
            shutdown,
            sequence: 0,
        });
        self.set_state(SessionState::Connected);
    }

    /// Queue one message. `build` receives the sequence id for this message.
    ///
    /// Never blocks: a full queue fails with `SendFailed`. The counter only
    /// advances when the message was queued.
    pub fn publish_with<F>(&self, qos: QualityOfService, build: F) -> Result<u64, CoreError>
    where
        F: FnOnce(u64) -> Result<Bytes, CoreError>,
    {
        let mut guard = self.link.lock();
        let Some(link) = guard.as_mut() else {
            return Err(self.not_connected());
        };

        let sequence_id = link.sequence;
        let payload = build(sequence_id)?;
        let bytes = payload.len();

        match link.outbound.try_send(Outbound { payload, qos }) {
            Ok(()) => {
                link.sequence += 1;
                trace!(device_id = %self.device_id, sequence_id, bytes, "queued message");
                Ok(sequence_id)
            }
            Err(TrySendError::Full(_)) => Err(CoreError::SendFailed {
                device_id: self.device_id.clone(),
                reason: "outbound queue full".into(),
            }),
            Err(TrySendError::Closed(_)) => Err(self.not_connected()),
        }
    }

    /// Queue a ready-made payload.
    pub fn publish(&self, payload: Bytes, qos: QualityOfService) -> Result<u64, CoreError> {
        self.publish_with(qos, |_| Ok(payload))
    }

    /// Drop the link and move to `Disconnected`. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
        if let Some(link) = self.link.lock().take() {
            link.shutdown.cancel();
        }
        let previous = self.set_state(SessionState::Disconnected);
        if previous != SessionState::Disconnected {
            debug!(device_id = %self.device_id, generation = self.generation, "session closed");
        }
    }

    /// The transport went away on its own. Same end state as `close`.
    pub(crate) fn mark_lost(&self) {
        if let Some(link) = self.link.lock().take() {
            link.shutdown.cancel();
        }
        self.set_state(SessionState::Disconnected);
    }

    fn set_state(&self, next: SessionState) -> SessionState {
        std::mem::replace(&mut *self.state.lock(), next)
    }

    fn not_connected(&self) -> CoreError {
        CoreError::NotConnected {
            device_id: self.device_id.clone(),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("generation", &self.generation)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
