//! Command dispatch: bridges CLI args -> agent calls -> output formatting.

pub mod config_cmd;
pub mod connect;
pub mod discover;
pub mod print;
pub mod send;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lanprint_config::{config_path, load_config, profile_to_device, to_agent_config};
use lanprint_core::{Agent, AgentConfig, Device};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Time given to the session writer to flush the last publish before close.
const FLUSH_GRACE: Duration = Duration::from_millis(500);

/// Dispatch a printer-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Connect(args) => connect::handle(args, global).await,
        Command::Send(args) => send::handle(args, global).await,
        Command::Print(args) => print::handle_print(args, global).await,
        Command::Upload(args) => print::handle_upload(args, global).await,
        Command::Discover(args) => discover::handle(args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config commands are not printer-bound".into(),
        )),
    }
}

// ── Connected printer ────────────────────────────────────────────────

/// An agent with one live session to the selected printer.
pub struct Connected {
    pub agent: Agent,
    /// Profile name from the config file.
    pub printer: String,
    pub device: Device,
}

impl Connected {
    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    /// Let queued publishes reach the wire, then close everything.
    pub async fn close(self) {
        tokio::time::sleep(FLUSH_GRACE).await;
        self.agent.shutdown();
    }
}

/// Resolve the selected printer profile into a device and agent tuning.
pub fn resolve_printer(global: &GlobalOpts) -> Result<(String, Device, AgentConfig), CliError> {
    let cfg = load_config()?;
    if cfg.printers.is_empty() {
        return Err(CliError::NoConfig {
            path: config_path().display().to_string(),
        });
    }

    let (name, profile) = cfg.printer(global.printer.as_deref())?;
    let device = profile_to_device(profile, &name)?;

    let mut agent_config = to_agent_config(&cfg.defaults);
    if let Some(secs) = global.timeout {
        agent_config.connect_timeout = Duration::from_secs(secs);
    }
    Ok((name, device, agent_config))
}

/// Resolve the selected printer and open a session to it.
pub async fn open_session(global: &GlobalOpts) -> Result<Connected, CliError> {
    let (printer, device, agent_config) = resolve_printer(global)?;
    // Failures surface as errors here; no host callback to notify.
    let agent = Agent::new(AgentConfig {
        report_connect_failures: false,
        ..agent_config
    });

    tracing::info!(
        printer = %printer,
        device_id = %device.id,
        address = %device.address,
        "connecting"
    );
    agent.connect(device.clone()).await?;

    Ok(Connected {
        agent,
        printer,
        device,
    })
}

/// A flag raised by the first Ctrl-C.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received");
            raised.store(true, Ordering::SeqCst);
        }
    });
    flag
}
