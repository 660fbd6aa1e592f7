//! Live report streaming.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use owo_colors::OwoColorize;
use tokio::sync::mpsc;

use lanprint_core::{ConnectStatus, QualityOfService, ReportSummary};

use crate::cli::{ConnectArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::open_session;

/// Asks the printer for a full status report instead of waiting for deltas.
const PUSH_ALL: &str = r#"{"pushing":{"sequence_id":"0","command":"pushall"}}"#;

enum WatchEvent {
    Report(String),
    Lost(String),
}

pub async fn handle(args: ConnectArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let session = open_session(global).await?;
    let device_id = session.device_id().to_owned();
    let printer = session.printer.clone();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = session.agent.dispatcher();
    {
        let tx = tx.clone();
        dispatcher.set_on_message(Some(Arc::new(move |_dev: &str, payload: &str| {
            let _ = tx.send(WatchEvent::Report(payload.to_owned()));
        })));
    }
    dispatcher.set_on_connected(Some(Arc::new(
        move |status: ConnectStatus, _dev: &str, reason: &str| {
            if status == ConnectStatus::Lost {
                let _ = tx.send(WatchEvent::Lost(reason.to_owned()));
            }
        },
    )));

    output::success(&format!("Connected to {printer} ({device_id})"), global.quiet);
    session
        .agent
        .publish_json(&device_id, PUSH_ALL, QualityOfService::AtMostOnce)?;

    let deadline = args.duration.map(Duration::from_secs);
    let stop = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(stop);

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            () = &mut stop => break Ok(()),
            event = rx.recv() => match event {
                Some(WatchEvent::Report(payload)) => {
                    let line = if args.raw || matches!(global.output, OutputFormat::Json) {
                        payload
                    } else {
                        let Some(summary) = session.agent.summary(&device_id) else {
                            continue;
                        };
                        summary_line(&summary)
                    };
                    output::print_output(&line, global.quiet);
                }
                Some(WatchEvent::Lost(reason)) => {
                    break Err(CliError::ConnectionFailed { printer: printer.clone(), reason });
                }
                None => break Ok(()),
            },
        }
    };

    session.agent.shutdown();
    result
}

fn summary_line(summary: &ReportSummary) -> String {
    let state = summary.gcode_state.as_deref().unwrap_or("UNKNOWN");
    let state = if output::should_color() {
        match state {
            "RUNNING" | "PREPARE" => state.green().to_string(),
            "PAUSE" => state.yellow().to_string(),
            "FAILED" => state.red().to_string(),
            _ => state.to_string(),
        }
    } else {
        state.to_string()
    };

    let mut line = format!("{} {state:<8}", Local::now().format("%H:%M:%S"));
    if let Some(pct) = summary.percent {
        line.push_str(&format!(" {pct:>3}%"));
    }
    if let (Some(layer), Some(total)) = (summary.layer, summary.total_layers) {
        line.push_str(&format!("  layer {layer}/{total}"));
    }
    if let Some(min) = summary.remaining {
        line.push_str(&format!("  {}h{:02}m left", min / 60, min % 60));
    }
    if let Some(t) = summary.nozzle_temp {
        line.push_str(&format!("  nozzle {t:.0}°C"));
    }
    if let Some(t) = summary.bed_temp {
        line.push_str(&format!("  bed {t:.0}°C"));
    }
    if let Some(name) = &summary.subtask_name {
        line.push_str(&format!("  [{name}]"));
    }
    line
}
