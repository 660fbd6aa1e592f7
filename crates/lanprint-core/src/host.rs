// ── Host boundary ──
//
// Synchronous surface for a host application that does not run an async
// runtime. `HostAgent` owns a multi-thread runtime plus an `Agent`, and
// flattens every outcome to a status code: `0` on success, the
// `CoreError::status_code()` of the failure otherwise.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, warn};

use lanprint_api::{Connector, PrintOptions, PrinterInfo, QualityOfService, Uploader};

use crate::agent::Agent;
use crate::config::{AgentConfig, DeviceCredentials, TlsVerification};
use crate::dispatch::{MessageArrivedFn, MessageFn, QueueOnMainFn};
use crate::error::CoreError;
use crate::model::{ConnectStatus, Device};
use crate::orchestrator::{CancelFn, JobHooks, JobStatus, PrintRequest, TransferRequest};

/// `(status, device_id, description)` with the status as its numeric code.
pub type LocalConnectFn = Arc<dyn Fn(i32, &str, &str) + Send + Sync>;
/// `(stage, code, message)`; see [`JobStatus::stage`] and [`JobStatus::code`].
pub type UpdateStatusFn = Arc<dyn Fn(i32, i32, &str) + Send + Sync>;

/// Print request as a host describes it.
#[derive(Debug, Clone, Default)]
pub struct PrintParams {
    pub dev_id: String,
    /// Display name of the job on the printer.
    pub project_name: String,
    /// Local path of the sliced project.
    pub filename: PathBuf,
    /// Name on the printer's storage. Empty picks the default.
    pub dst_file: String,
    /// Plate path inside the project. Empty picks the configured default.
    pub plate_path: String,
    /// JSON array of tray indices, e.g. `[0,1,-1]`. Empty for none.
    pub ams_mapping: String,
    pub options: PrintOptions,
}

impl PrintParams {
    fn into_request(self) -> Result<PrintRequest, CoreError> {
        let ams_mapping = if self.ams_mapping.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str::<Vec<i32>>(&self.ams_mapping)
                .map_err(|e| {
                    CoreError::invalid(format!("ams_mapping is not an integer array: {e}"))
                })?
        };

        let mut request = PrintRequest::new(self.dev_id, self.filename);
        request.transfer.remote_name = non_empty(self.dst_file);
        request.project_name = non_empty(self.project_name);
        request.plate_path = non_empty(self.plate_path);
        request.options = self.options;
        request.ams_mapping = ams_mapping;
        Ok(request)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}

pub struct HostAgent {
    runtime: Option<Runtime>,
    agent: Agent,
    config_dir: Mutex<Option<PathBuf>>,
    selected_machine: Mutex<Option<String>>,
}

impl HostAgent {
    pub fn new(config: AgentConfig) -> Result<Self, CoreError> {
        let runtime = build_runtime()?;
        Ok(Self::from_parts(runtime, Agent::new(config)))
    }

    pub fn with_transports(
        config: AgentConfig,
        connector: Arc<dyn Connector>,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self, CoreError> {
        let runtime = build_runtime()?;
        Ok(Self::from_parts(
            runtime,
            Agent::with_transports(config, connector, uploader),
        ))
    }

    fn from_parts(runtime: Runtime, agent: Agent) -> Self {
        debug!(version = env!("CARGO_PKG_VERSION"), "host agent created");
        Self {
            runtime: Some(runtime),
            agent,
            config_dir: Mutex::new(None),
            selected_machine: Mutex::new(None),
        }
    }

    /// The async agent behind this host surface.
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    // ── Sessions ─────────────────────────────────────────────────────

    pub fn connect_printer(
        &self,
        dev_id: &str,
        dev_ip: &str,
        username: &str,
        password: &str,
        use_ssl: bool,
    ) -> i32 {
        let credentials = if username.trim().is_empty() {
            DeviceCredentials::access_code(password)
        } else {
            DeviceCredentials::new(username, password)
        };
        let device = Device::new(dev_id, dev_ip, credentials, use_ssl);
        let agent = self.agent.clone();
        status(self.block(async move { agent.connect(device).await }))
    }

    pub fn disconnect_printer(&self, dev_id: &str) -> i32 {
        self.agent.disconnect(dev_id);
        0
    }

    /// Publish `json` to the printer. `qos` is the MQTT level 0..=2.
    pub fn send_message_to_printer(&self, dev_id: &str, json: &str, qos: i32) -> i32 {
        let result = self
            .agent
            .publish_json(dev_id, json, QualityOfService::from_level(qos));
        if let Err(e) = &result {
            debug!(device_id = dev_id, error = %e, "send rejected");
        }
        status(result)
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    pub fn start_print(
        &self,
        params: PrintParams,
        update: Option<UpdateStatusFn>,
        cancelled: Option<CancelFn>,
    ) -> i32 {
        self.start_local_print(params, update, cancelled)
    }

    pub fn start_local_print_with_record(
        &self,
        params: PrintParams,
        update: Option<UpdateStatusFn>,
        cancelled: Option<CancelFn>,
    ) -> i32 {
        self.start_local_print(params, update, cancelled)
    }

    /// Upload the project, wait for the printer to index it, then start it.
    pub fn start_local_print(
        &self,
        params: PrintParams,
        update: Option<UpdateStatusFn>,
        cancelled: Option<CancelFn>,
    ) -> i32 {
        let request = match params.into_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "print rejected");
                return e.status_code();
            }
        };
        let hooks = job_hooks(update, cancelled);
        let agent = self.agent.clone();
        status(self.block(async move { agent.start_print(request, &hooks).await }))
    }

    /// Upload the project to the printer's storage without printing it.
    pub fn start_send_gcode_to_sdcard(
        &self,
        params: PrintParams,
        update: Option<UpdateStatusFn>,
        cancelled: Option<CancelFn>,
    ) -> i32 {
        let request = TransferRequest {
            device_id: params.dev_id,
            source: params.filename,
            remote_name: non_empty(params.dst_file),
        };
        let hooks = job_hooks(update, cancelled);
        let agent = self.agent.clone();
        status(self.block(async move { agent.send_to_storage(request, &hooks).await }))
    }

    // ── Callbacks ────────────────────────────────────────────────────

    pub fn set_on_ssdp_msg_fn(&self, f: Option<MessageArrivedFn>) -> i32 {
        self.agent.dispatcher().set_on_msg_arrived(f);
        0
    }

    pub fn set_on_local_connect_fn(&self, f: Option<LocalConnectFn>) -> i32 {
        let adapted = f.map(|f| -> crate::dispatch::ConnectedFn {
            Arc::new(move |status: ConnectStatus, dev_id: &str, desc: &str| {
                f(status.code(), dev_id, desc);
            })
        });
        self.agent.dispatcher().set_on_connected(adapted);
        0
    }

    pub fn set_on_local_message_fn(&self, f: Option<MessageFn>) -> i32 {
        self.agent.dispatcher().set_on_message(f);
        0
    }

    pub fn set_queue_on_main_fn(&self, f: Option<QueueOnMainFn>) -> i32 {
        self.agent.dispatcher().set_queue_on_main(f);
        0
    }

    // ── Settings ─────────────────────────────────────────────────────

    /// Verify printers against `folder/filename` from now on.
    pub fn set_cert_file(&self, folder: &str, filename: &str) -> i32 {
        if folder.trim().is_empty() || filename.trim().is_empty() {
            return CoreError::invalid("certificate folder and file name are required")
                .status_code();
        }
        self.agent
            .set_tls(TlsVerification::from_cert_file(folder, filename));
        0
    }

    pub fn set_config_dir(&self, dir: &str) -> i32 {
        if dir.trim().is_empty() {
            return CoreError::invalid("config dir must not be empty").status_code();
        }
        *self.config_dir.lock() = Some(PathBuf::from(dir));
        0
    }

    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config_dir.lock().clone()
    }

    #[allow(clippy::unused_self)]
    pub fn get_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Printers announced on every discovery round, e.g. the configured ones.
    pub fn set_static_printers(&self, printers: Vec<PrinterInfo>) -> i32 {
        debug!(count = printers.len(), "static printers set");
        self.agent.set_static_printers(printers);
        0
    }

    pub fn start_discovery(&self, start: bool) -> i32 {
        let Some(runtime) = &self.runtime else {
            return CoreError::Internal("runtime is gone".into()).status_code();
        };
        if start {
            let _guard = runtime.enter();
            self.agent.start_discovery();
        } else {
            self.agent.stop_discovery();
        }
        0
    }

    pub fn set_user_selected_machine(&self, dev_id: &str) -> i32 {
        *self.selected_machine.lock() = non_empty(dev_id.to_owned());
        0
    }

    /// Last selected machine; empty when none.
    pub fn get_user_selected_machine(&self) -> String {
        self.selected_machine.lock().clone().unwrap_or_default()
    }

    /// Merged report JSON of the printer, if any arrived.
    pub fn get_last_report(&self, dev_id: &str) -> Option<String> {
        self.agent
            .last_report(dev_id)
            .as_ref()
            .map(ToString::to_string)
    }

    // ── Runtime bridge ───────────────────────────────────────────────

    fn block<F, T>(&self, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, CoreError>> + Send + 'static,
        T: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            warn!("blocking host call made from inside an async runtime");
            return Err(CoreError::Internal(
                "blocking host call made from inside an async runtime".into(),
            ));
        }
        let Some(runtime) = &self.runtime else {
            return Err(CoreError::Internal("runtime is gone".into()));
        };
        runtime
            .block_on(runtime.spawn(fut))
            .map_err(|e| CoreError::Internal(format!("task failed: {e}")))?
    }
}

impl Drop for HostAgent {
    fn drop(&mut self) {
        self.agent.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for HostAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAgent")
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

fn build_runtime() -> Result<Runtime, CoreError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lanprint-worker")
        .build()
        .map_err(|e| CoreError::Internal(format!("cannot start runtime: {e}")))
}

fn job_hooks(update: Option<UpdateStatusFn>, cancelled: Option<CancelFn>) -> JobHooks {
    JobHooks {
        on_status: update.map(|f| -> crate::orchestrator::StatusFn {
            Arc::new(move |s: &JobStatus| f(s.stage(), s.code(), &s.to_string()))
        }),
        was_cancelled: cancelled,
    }
}

fn status<T>(result: Result<T, CoreError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}
