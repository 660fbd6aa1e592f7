//! Print and upload handlers.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytesize::ByteSize;
use indicatif::ProgressBar;
use serde::Serialize;

use lanprint_core::{JobHooks, JobStatus, PrintOptions, PrintRequest, TransferRequest};

use crate::cli::{GlobalOpts, OutputFormat, PrintArgs, UploadArgs};
use crate::error::CliError;
use crate::output;

use super::{interrupt_flag, open_session};

#[derive(Debug, Serialize)]
struct JobReport {
    printer: String,
    device_id: String,
    job_id: String,
    remote_name: String,
    bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sequence_id: Option<u64>,
}

// ── Print ────────────────────────────────────────────────────────────

pub async fn handle_print(args: PrintArgs, global: &GlobalOpts) -> Result<(), CliError> {
    check_source(&args.file)?;

    let session = open_session(global).await?;
    let remote_name = args.remote_name.clone();

    let mut request = PrintRequest::new(session.device_id(), &args.file);
    request.transfer.remote_name.clone_from(&remote_name);
    request.project_name = args.project;
    request.plate_path = args.plate;
    request.ams_mapping = args.ams_mapping;
    request.options = PrintOptions {
        timelapse: args.timelapse,
        bed_leveling: !args.no_bed_leveling,
        flow_cali: args.flow_cali,
        vibration_cali: args.vibration_cali,
        layer_inspect: !args.no_layer_inspect,
        use_ams: !args.no_ams,
    };

    let bar = output::transfer_bar(global.quiet);
    let hooks = job_hooks(&bar);
    let result = session.agent.start_print(request, &hooks).await;
    bar.finish_and_clear();

    let printer = session.printer.clone();
    let device_id = session.device_id().to_owned();
    session.close().await;
    let outcome = result?;

    let report = JobReport {
        printer,
        device_id,
        job_id: outcome.job_id.to_string(),
        remote_name: remote_name.unwrap_or_else(|| lanprint_core::DEFAULT_REMOTE_NAME.into()),
        bytes: outcome.bytes,
        sequence_id: Some(outcome.sequence_id),
    };
    emit(
        global,
        &report,
        &format!(
            "Print started on {} ({}, sequence {})",
            report.printer,
            ByteSize(report.bytes),
            outcome.sequence_id
        ),
    );
    Ok(())
}

// ── Upload ───────────────────────────────────────────────────────────

pub async fn handle_upload(args: UploadArgs, global: &GlobalOpts) -> Result<(), CliError> {
    check_source(&args.file)?;
    let remote_name = if let Some(name) = args.remote_name {
        name
    } else {
        local_name(&args.file)?
    };

    let session = open_session(global).await?;
    let request = TransferRequest {
        device_id: session.device_id().to_owned(),
        source: args.file,
        remote_name: Some(remote_name),
    };

    let bar = output::transfer_bar(global.quiet);
    let hooks = job_hooks(&bar);
    let result = session.agent.send_to_storage(request, &hooks).await;
    bar.finish_and_clear();

    let printer = session.printer.clone();
    let device_id = session.device_id().to_owned();
    session.close().await;
    let job = result?;

    let report = JobReport {
        printer,
        device_id,
        job_id: job.id.to_string(),
        remote_name: job.remote_name,
        bytes: job.bytes_sent,
        sequence_id: None,
    };
    emit(
        global,
        &report,
        &format!(
            "Uploaded {} to {} ({})",
            report.remote_name,
            report.printer,
            ByteSize(report.bytes)
        ),
    );
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────

fn check_source(path: &Path) -> Result<(), CliError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(CliError::Validation {
            field: "file".into(),
            reason: format!("{} is not a regular file", path.display()),
        }),
        Err(e) => Err(CliError::Validation {
            field: "file".into(),
            reason: format!("{}: {e}", path.display()),
        }),
    }
}

fn local_name(path: &Path) -> Result<String, CliError> {
    path.file_name()
        .and_then(std::ffi::OsStr::to_str)
        .map(str::to_owned)
        .ok_or_else(|| CliError::Validation {
            field: "file".into(),
            reason: format!("{} has no usable file name", path.display()),
        })
}

/// Progress drives the bar; Ctrl-C cancels between stages.
fn job_hooks(bar: &ProgressBar) -> JobHooks {
    let bar = bar.clone();
    let interrupted = interrupt_flag();

    JobHooks {
        on_status: Some(Arc::new(move |status: &JobStatus| {
            match status {
                JobStatus::Uploading { sent, total } => {
                    bar.set_length(*total);
                    bar.set_position(*sent);
                    bar.set_message("Uploading");
                }
                JobStatus::Uploaded { bytes } => {
                    bar.set_position(*bytes);
                    bar.set_message("Uploaded");
                }
                JobStatus::Settling | JobStatus::Sending => bar.set_message(status.to_string()),
                JobStatus::Started { .. } | JobStatus::Failed(_) | JobStatus::Cancelled => {}
            }
            tracing::debug!(stage = status.stage(), %status, "job status");
        })),
        was_cancelled: Some(Arc::new(move || interrupted.load(Ordering::SeqCst))),
    }
}

fn emit(global: &GlobalOpts, report: &JobReport, line: &str) {
    match global.output {
        OutputFormat::Json => output::print_output(&output::render_json(report), global.quiet),
        OutputFormat::Table => output::success(line, global.quiet),
    }
}
