//! Raw message publishing.

use lanprint_core::QualityOfService;

use crate::cli::{GlobalOpts, OutputFormat, SendArgs};
use crate::error::CliError;
use crate::output;

use super::open_session;

pub async fn handle(args: SendArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let payload = match (&args.payload, &args.file) {
        (_, Some(path)) => std::fs::read_to_string(path)?,
        (Some(text), None) => text.clone(),
        (None, None) => {
            return Err(CliError::Validation {
                field: "payload".into(),
                reason: "pass a JSON payload or --file".into(),
            });
        }
    };
    // Reject bad input before touching the network.
    let _: serde_json::Value = serde_json::from_str(&payload)?;

    let session = open_session(global).await?;
    let sequence_id = session.agent.publish_json(
        session.device_id(),
        &payload,
        QualityOfService::from_level(args.qos),
    )?;
    let printer = session.printer.clone();
    session.close().await;

    match global.output {
        OutputFormat::Json => output::print_output(
            &output::render_json(&serde_json::json!({
                "printer": printer,
                "sequence_id": sequence_id,
            })),
            global.quiet,
        ),
        OutputFormat::Table => {
            output::success(&format!("Sent to {printer} (sequence {sequence_id})"), global.quiet);
        }
    }
    Ok(())
}
