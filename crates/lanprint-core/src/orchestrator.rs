// ── Job orchestration ──
//
// Sequences one print: upload the artifact, let the printer index it,
// then publish the `project_file` command. The command is never built
// before the upload has completed, and never published once the host's
// cancel predicate has fired.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use lanprint_api::{
    PrintOptions, ProgressFn, ProjectFileCommand, QualityOfService, TransferProgress, Uploader,
};

use crate::config::{AgentConfig, DEFAULT_REMOTE_NAME};
use crate::error::CoreError;
use crate::model::Device;
use crate::registry::DeviceRegistry;

/// Granularity of cancel polling during the settle delay.
const CANCEL_POLL: Duration = Duration::from_millis(100);

// ── Requests ─────────────────────────────────────────────────────────

/// Upload a file to a printer's storage.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub device_id: String,
    pub source: PathBuf,
    /// Name on the printer. Defaults to `print.gcode.3mf`.
    pub remote_name: Option<String>,
}

/// Upload a file and start printing it.
#[derive(Debug, Clone)]
pub struct PrintRequest {
    pub transfer: TransferRequest,
    /// Display name on the printer. Defaults to the remote name.
    pub project_name: Option<String>,
    /// Plate inside the project. Defaults to the configured plate path.
    pub plate_path: Option<String>,
    pub options: PrintOptions,
    pub ams_mapping: Vec<i32>,
}

impl PrintRequest {
    pub fn new(device_id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            transfer: TransferRequest {
                device_id: device_id.into(),
                source: source.into(),
                remote_name: None,
            },
            project_name: None,
            plate_path: None,
            options: PrintOptions::default(),
            ams_mapping: Vec::new(),
        }
    }
}

// ── Jobs ─────────────────────────────────────────────────────────────

/// One upload, from request to completion. Never retried.
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub id: Uuid,
    pub device_id: String,
    pub source: PathBuf,
    pub remote_name: String,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    pub completed: bool,
}

impl TransferJob {
    fn new(request: &TransferRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: request.device_id.clone(),
            source: request.source.clone(),
            remote_name: request
                .remote_name
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_REMOTE_NAME.into()),
            total_bytes: 0,
            bytes_sent: 0,
            completed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrintJob {
    pub id: Uuid,
    pub transfer: TransferJob,
    pub subtask_name: String,
    pub plate_path: String,
    pub options: PrintOptions,
    pub ams_mapping: Vec<i32>,
}

impl PrintJob {
    fn new(request: PrintRequest, config: &AgentConfig) -> Self {
        let transfer = TransferJob::new(&request.transfer);
        Self {
            id: Uuid::new_v4(),
            subtask_name: request
                .project_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| transfer.remote_name.clone()),
            plate_path: request
                .plate_path
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| config.plate_path.clone()),
            transfer,
            options: request.options,
            ams_mapping: request.ams_mapping,
        }
    }

    fn command(&self, sequence_id: u64) -> ProjectFileCommand {
        ProjectFileCommand::new(
            sequence_id,
            self.plate_path.clone(),
            &self.transfer.remote_name,
            self.options,
            self.ams_mapping.clone(),
        )
        .with_subtask_name(self.subtask_name.clone())
    }
}

// ── Status reporting ─────────────────────────────────────────────────

/// Progress reported through the job's status callback.
#[derive(Debug, Clone)]
pub enum JobStatus {
    Uploading { sent: u64, total: u64 },
    Uploaded { bytes: u64 },
    Settling,
    Sending,
    Started { sequence_id: u64 },
    Failed(CoreError),
    Cancelled,
}

impl JobStatus {
    fn from_error(err: &CoreError) -> Self {
        match err {
            CoreError::Cancelled => Self::Cancelled,
            other => Self::Failed(other.clone()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Started { .. } | Self::Failed(_) | Self::Cancelled
        )
    }

    /// Stage number reported to hosts.
    pub fn stage(&self) -> i32 {
        match self {
            Self::Uploading { .. } => 1,
            Self::Uploaded { .. } => 2,
            Self::Settling => 3,
            Self::Sending => 4,
            Self::Started { .. } => 5,
            Self::Failed(_) => 6,
            Self::Cancelled => 7,
        }
    }

    /// Upload percent while uploading, the status code once failed, else 0.
    pub fn code(&self) -> i32 {
        match self {
            Self::Uploading { sent, total } => i32::from(
                TransferProgress {
                    sent: *sent,
                    total: *total,
                }
                .percent(),
            ),
            Self::Failed(e) => e.status_code(),
            Self::Cancelled => CoreError::Cancelled.status_code(),
            _ => 0,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uploading { sent, total } => write!(f, "Uploading {sent}/{total} bytes"),
            Self::Uploaded { bytes } => write!(f, "Uploaded {bytes} bytes"),
            Self::Settling => f.write_str("Waiting for printer"),
            Self::Sending => f.write_str("Sending print command"),
            Self::Started { sequence_id } => write!(f, "Print started (sequence {sequence_id})"),
            Self::Failed(e) => write!(f, "{e}"),
            Self::Cancelled => f.write_str("Cancelled"),
        }
    }
}

pub type StatusFn = Arc<dyn Fn(&JobStatus) + Send + Sync>;
pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Host hooks for one job. Both are optional.
#[derive(Clone, Default)]
pub struct JobHooks {
    pub on_status: Option<StatusFn>,
    pub was_cancelled: Option<CancelFn>,
}

impl JobHooks {
    fn report(&self, status: &JobStatus) {
        if let Some(f) = &self.on_status {
            f(status);
        }
    }

    fn checkpoint(&self) -> Result<(), CoreError> {
        match &self.was_cancelled {
            Some(f) if f() => Err(CoreError::Cancelled),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for JobHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHooks")
            .field("on_status", &self.on_status.is_some())
            .field("was_cancelled", &self.was_cancelled.is_some())
            .finish()
    }
}

/// Result of a started print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintOutcome {
    pub job_id: Uuid,
    pub sequence_id: u64,
    pub bytes: u64,
}

// ── Orchestrator ─────────────────────────────────────────────────────

/// Borrowed view of the agent's collaborators for one job.
pub(crate) struct Orchestrator<'a> {
    pub registry: &'a DeviceRegistry,
    pub uploader: &'a dyn Uploader,
    pub config: &'a AgentConfig,
}

impl Orchestrator<'_> {
    /// Upload, settle, publish. Reports every step through `hooks`.
    pub async fn print(
        &self,
        request: PrintRequest,
        hooks: &JobHooks,
    ) -> Result<PrintOutcome, CoreError> {
        let mut job = PrintJob::new(request, self.config);
        let result = self.drive_print(&mut job, hooks).await;

        // The outcome and the last reported status are the job's terminal state.
        match &result {
            Ok(outcome) => {
                info!(
                    device_id = %job.transfer.device_id,
                    job_id = %job.id,
                    sequence_id = outcome.sequence_id,
                    "print started"
                );
            }
            Err(e) => {
                warn!(
                    device_id = %job.transfer.device_id,
                    job_id = %job.id,
                    error = %e,
                    "print job ended"
                );
                hooks.report(&JobStatus::from_error(e));
            }
        }
        result
    }

    async fn drive_print(
        &self,
        job: &mut PrintJob,
        hooks: &JobHooks,
    ) -> Result<PrintOutcome, CoreError> {
        let device_id = job.transfer.device_id.clone();
        if device_id.trim().is_empty() {
            return Err(CoreError::invalid("device id must not be empty"));
        }

        // Fail fast: no point uploading to a printer we cannot command.
        self.registry.connected_session(&device_id)?;
        let device = self.device(&device_id)?;

        self.upload(&device, &mut job.transfer, hooks).await?;

        hooks.checkpoint()?;
        hooks.report(&JobStatus::Settling);
        self.settle(hooks).await?;
        hooks.checkpoint()?;

        hooks.report(&JobStatus::Sending);
        let session = self.registry.connected_session(&device_id)?;
        let sequence_id = session.publish_with(QualityOfService::default(), |seq| {
            let payload = job
                .command(seq)
                .to_payload()
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            Ok(Bytes::from(payload))
        })?;

        hooks.report(&JobStatus::Started { sequence_id });
        Ok(PrintOutcome {
            job_id: job.id,
            sequence_id,
            bytes: job.transfer.bytes_sent,
        })
    }

    /// Upload only; no start command.
    pub async fn transfer(
        &self,
        request: TransferRequest,
        hooks: &JobHooks,
    ) -> Result<TransferJob, CoreError> {
        let mut job = TransferJob::new(&request);
        let result = async {
            let device = self.device(&job.device_id)?;
            self.upload(&device, &mut job, hooks).await
        }
        .await;

        match result {
            Ok(()) => Ok(job),
            Err(e) => {
                warn!(device_id = %job.device_id, job_id = %job.id, error = %e, "transfer failed");
                hooks.report(&JobStatus::from_error(&e));
                Err(e)
            }
        }
    }

    fn device(&self, device_id: &str) -> Result<Device, CoreError> {
        self.registry
            .device(device_id)
            .ok_or_else(|| CoreError::NotConnected {
                device_id: device_id.to_owned(),
            })
    }

    async fn upload(
        &self,
        device: &Device,
        job: &mut TransferJob,
        hooks: &JobHooks,
    ) -> Result<(), CoreError> {
        let transfer_failed = |reason: String| CoreError::TransferFailed {
            device_id: device.id.clone(),
            reason,
        };

        let meta = tokio::fs::metadata(&job.source)
            .await
            .map_err(|e| transfer_failed(format!("cannot read {}: {e}", job.source.display())))?;
        if !meta.is_file() {
            return Err(transfer_failed(format!("{} is not a file", job.source.display())));
        }
        job.total_bytes = meta.len();

        hooks.report(&JobStatus::Uploading {
            sent: 0,
            total: job.total_bytes,
        });
        debug!(
            device_id = %device.id,
            source = %job.source.display(),
            remote = %job.remote_name,
            bytes = job.total_bytes,
            "uploading"
        );

        let progress: Option<ProgressFn> = hooks.on_status.clone().map(|f| {
            let cb: ProgressFn = Arc::new(move |p: TransferProgress| {
                f(&JobStatus::Uploading {
                    sent: p.sent,
                    total: p.total,
                });
            });
            cb
        });

        let endpoint = device.endpoint(&self.config.tls);
        let started = Instant::now();
        let sent = tokio::time::timeout(
            self.config.upload_timeout,
            self.uploader
                .upload(&endpoint, &job.source, &job.remote_name, progress),
        )
        .await
        .map_err(|_| {
            transfer_failed(format!(
                "upload timed out after {}s",
                self.config.upload_timeout.as_secs()
            ))
        })?
        .map_err(|e| transfer_failed(e.to_string()))?;

        job.bytes_sent = sent;
        job.completed = true;
        debug!(
            device_id = %device.id,
            bytes = sent,
            elapsed_ms = started.elapsed().as_millis(),
            "upload complete"
        );
        hooks.report(&JobStatus::Uploaded { bytes: sent });
        Ok(())
    }

    /// Wait out the settle delay, polling the cancel predicate.
    async fn settle(&self, hooks: &JobHooks) -> Result<(), CoreError> {
        let deadline = Instant::now() + self.config.settle_delay;
        loop {
            hooks.checkpoint()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_defaults_fill_names() {
        let config = AgentConfig::default();
        let job = PrintJob::new(PrintRequest::new("P1", "/tmp/a.3mf"), &config);

        assert_eq!(job.transfer.remote_name, "print.gcode.3mf");
        assert_eq!(job.subtask_name, "print.gcode.3mf");
        assert_eq!(job.plate_path, "Metadata/plate_1.gcode");
    }

    #[test]
    fn project_name_becomes_subtask() {
        let config = AgentConfig::default();
        let mut request = PrintRequest::new("P1", "/tmp/a.3mf");
        request.project_name = Some("benchy".into());
        request.transfer.remote_name = Some("benchy.3mf".into());
        let job = PrintJob::new(request, &config);

        let cmd = job.command(3);
        assert_eq!(cmd.subtask_name, "benchy");
        assert_eq!(cmd.url, "ftp://benchy.3mf");
        assert_eq!(cmd.sequence_id, 3);
    }

    #[test]
    fn cancelled_error_maps_to_cancelled_status() {
        assert!(matches!(
            JobStatus::from_error(&CoreError::Cancelled),
            JobStatus::Cancelled
        ));
        assert!(!JobStatus::Settling.is_terminal());
    }

    #[test]
    fn host_codes() {
        let uploading = JobStatus::Uploading { sent: 50, total: 200 };
        assert_eq!((uploading.stage(), uploading.code()), (1, 25));

        let failed = JobStatus::Failed(CoreError::TransferFailed {
            device_id: "P1".into(),
            reason: "550 denied".into(),
        });
        assert_eq!((failed.stage(), failed.code()), (6, -5));
        assert_eq!(JobStatus::Cancelled.code(), -6);
        assert_eq!(JobStatus::Started { sequence_id: 0 }.to_string(), "Print started (sequence 0)");
    }
}
