//! Printer sessions, file transfer and print-job orchestration for LAN
//! 3D printers.
//!
//! - **[`Agent`]**: async facade. [`connect()`](Agent::connect) opens one
//!   MQTT session per printer (a newer connect supersedes an older one),
//!   [`start_print()`](Agent::start_print) uploads a project over FTPS and
//!   then publishes the `project_file` command.
//!
//! - **[`DeviceRegistry`]**: `DashMap` of device id to device, current
//!   [`Session`] and last merged report.
//!
//! - **[`Dispatcher`]**: one host callback per event kind, swapped
//!   atomically through `ArcSwap`, optionally routed through a
//!   main-context queue.
//!
//! - **[`HostAgent`]**: blocking wrapper owning its own runtime, returning
//!   integer status codes (see [`CoreError::status_code`]).

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────

pub use agent::Agent;
pub use config::{AgentConfig, DEFAULT_REMOTE_NAME, DeviceCredentials, TlsVerification};
pub use dispatch::{Callbacks, ConnectedFn, Dispatcher, MessageArrivedFn, MessageFn, QueueOnMainFn};
pub use error::CoreError;
pub use host::{HostAgent, LocalConnectFn, PrintParams, UpdateStatusFn};
pub use model::{ConnectStatus, Device, ReportSummary, SessionState};
pub use orchestrator::{
    CancelFn, JobHooks, JobStatus, PrintJob, PrintOutcome, PrintRequest, StatusFn,
    TransferJob, TransferRequest,
};
pub use registry::DeviceRegistry;
pub use session::Session;

pub use lanprint_api::{PrintOptions, PrinterInfo, QualityOfService};
