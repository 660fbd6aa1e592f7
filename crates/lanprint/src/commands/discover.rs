//! SSDP discovery.

use std::time::Duration;

use serde::Serialize;
use tabled::Tabled;

use lanprint_config::load_config_or_default;
use lanprint_core::{Agent, AgentConfig, PrinterInfo};

use crate::cli::{DiscoverArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize, Tabled)]
struct PrinterRow {
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "Firmware")]
    firmware: String,
    #[tabled(rename = "Configured")]
    configured: String,
}

pub async fn handle(args: DiscoverArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let agent = Agent::new(AgentConfig {
        discovery_window: Duration::from_secs(args.wait),
        ..AgentConfig::default()
    });
    let cfg = load_config_or_default();
    agent.set_static_printers(cfg.static_printers());
    let found = agent.discover().await?;
    agent.shutdown();

    let rows: Vec<PrinterRow> = found
        .iter()
        .map(|p| {
            let configured = cfg
                .printers
                .iter()
                .find(|(_, profile)| profile.dev_id == p.serial)
                .map(|(name, _)| name.clone())
                .unwrap_or_default();
            to_row(p, configured)
        })
        .collect();

    if rows.is_empty() {
        if !global.quiet {
            eprintln!("No printers answered within {}s", args.wait);
        }
        return Ok(());
    }

    let out = match global.output {
        OutputFormat::Table => output::render_table(&rows),
        OutputFormat::Json => output::render_json(&rows),
    };
    output::print_output(&out, global.quiet);
    Ok(())
}

fn to_row(p: &PrinterInfo, configured: String) -> PrinterRow {
    PrinterRow {
        serial: p.serial.clone(),
        name: p.name.clone(),
        model: p.model.clone(),
        ip: p.ip.to_string(),
        firmware: p.firmware.clone().unwrap_or_default(),
        configured,
    }
}
