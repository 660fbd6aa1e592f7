// ── Event dispatcher ──
//
// Process-wide table of host callbacks, one slot per event kind. The table
// is an immutable snapshot swapped atomically on every "set" call, so a
// dispatch always sees one consistent combination of handler and
// main-context indirection.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::trace;

use crate::model::ConnectStatus;

/// Printer-arrival notice (JSON).
pub type MessageArrivedFn = Arc<dyn Fn(&str) + Send + Sync>;
/// `(status, device_id, description)`.
pub type ConnectedFn = Arc<dyn Fn(ConnectStatus, &str, &str) + Send + Sync>;
/// `(device_id, raw_payload)`.
pub type MessageFn = Arc<dyn Fn(&str, &str) + Send + Sync>;
/// Runs a dispatch on the host's main/UI context.
pub type QueueOnMainFn = Arc<dyn Fn(Box<dyn FnOnce() + Send>) + Send + Sync>;

/// One immutable generation of the callback table.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_msg_arrived: Option<MessageArrivedFn>,
    pub on_connected: Option<ConnectedFn>,
    pub on_message: Option<MessageFn>,
    pub queue_on_main: Option<QueueOnMainFn>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_msg_arrived", &self.on_msg_arrived.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("queue_on_main", &self.queue_on_main.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct Dispatcher {
    table: ArcSwap<Callbacks>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current table.
    pub fn snapshot(&self) -> Arc<Callbacks> {
        self.table.load_full()
    }

    // ── Registration ─────────────────────────────────────────────────

    pub fn set_on_msg_arrived(&self, f: Option<MessageArrivedFn>) {
        self.update(|t| t.on_msg_arrived.clone_from(&f));
    }

    pub fn set_on_connected(&self, f: Option<ConnectedFn>) {
        self.update(|t| t.on_connected.clone_from(&f));
    }

    pub fn set_on_message(&self, f: Option<MessageFn>) {
        self.update(|t| t.on_message.clone_from(&f));
    }

    pub fn set_queue_on_main(&self, f: Option<QueueOnMainFn>) {
        self.update(|t| t.queue_on_main.clone_from(&f));
    }

    fn update(&self, mut apply: impl FnMut(&mut Callbacks)) {
        self.table.rcu(|current| {
            let mut next = Callbacks::clone(current);
            apply(&mut next);
            next
        });
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    pub fn printer_arrived(&self, notice: String) {
        let table = self.snapshot();
        let Some(handler) = table.on_msg_arrived.clone() else {
            return;
        };
        run(&table, Box::new(move || handler(&notice)));
    }

    pub fn connected(&self, status: ConnectStatus, device_id: &str, description: &str) {
        let table = self.snapshot();
        let Some(handler) = table.on_connected.clone() else {
            trace!(device_id, %status, "no connect handler");
            return;
        };
        let device_id = device_id.to_owned();
        let description = description.to_owned();
        run(
            &table,
            Box::new(move || handler(status, &device_id, &description)),
        );
    }

    pub fn message(&self, device_id: &str, payload: String) {
        let table = self.snapshot();
        let Some(handler) = table.on_message.clone() else {
            return;
        };
        let device_id = device_id.to_owned();
        run(&table, Box::new(move || handler(&device_id, &payload)));
    }
}

/// Inline on the calling thread unless the host installed an indirection.
fn run(table: &Callbacks, job: Box<dyn FnOnce() + Send>) {
    match &table.queue_on_main {
        Some(queue) => queue(job),
        None => job(),
    }
}
