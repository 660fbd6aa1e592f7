//! Clap derive structures for the `lanprint` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// lanprint -- drive 3D printers over the local network
#[derive(Debug, Parser)]
#[command(
    name = "lanprint",
    version,
    about = "Send and start print jobs on LAN-mode 3D printers",
    long_about = "Talks to printers directly over the local network: MQTT over TLS\n\
        for commands and status, implicit FTPS for file transfer, SSDP for\n\
        discovery. No cloud account involved.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Printer profile to use
    #[arg(long, short = 'p', env = "LANPRINT_PRINTER", global = true)]
    pub printer: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Connect timeout in seconds (overrides config)
    #[arg(long, env = "LANPRINT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable (default)
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and stream printer reports until interrupted
    #[command(alias = "watch")]
    Connect(ConnectArgs),

    /// Publish a raw JSON message to the printer
    Send(SendArgs),

    /// Upload a sliced project and start printing it
    Print(PrintArgs),

    /// Upload a file to the printer's storage without printing
    Upload(UploadArgs),

    /// Search the local network for printers
    Discover(DiscoverArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Connect ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Stop after this many seconds
    #[arg(long)]
    pub duration: Option<u64>,

    /// Print raw report JSON instead of a summary line
    #[arg(long)]
    pub raw: bool,
}

// ── Send ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SendArgs {
    /// JSON payload, e.g. '{"pushing":{"command":"pushall"}}'
    #[arg(required_unless_present = "file")]
    pub payload: Option<String>,

    /// Read the payload from a file
    #[arg(long, short = 'f', conflicts_with = "payload")]
    pub file: Option<PathBuf>,

    /// MQTT quality of service (0, 1 or 2)
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(i32).range(0..=2))]
    pub qos: i32,
}

// ── Print / Upload ───────────────────────────────────────────────────

#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Args)]
pub struct PrintArgs {
    /// Sliced project (.3mf) to print
    pub file: PathBuf,

    /// Name on the printer's storage
    #[arg(long)]
    pub remote_name: Option<String>,

    /// Job name shown on the printer
    #[arg(long)]
    pub project: Option<String>,

    /// Plate gcode path inside the project
    #[arg(long)]
    pub plate: Option<String>,

    /// AMS tray per filament, comma-separated (e.g. 0,1,-1)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub ams_mapping: Vec<i32>,

    /// Feed from the external spool instead of the AMS
    #[arg(long)]
    pub no_ams: bool,

    /// Record a timelapse
    #[arg(long)]
    pub timelapse: bool,

    /// Skip automatic bed leveling
    #[arg(long)]
    pub no_bed_leveling: bool,

    /// Run flow calibration
    #[arg(long)]
    pub flow_cali: bool,

    /// Run vibration calibration
    #[arg(long)]
    pub vibration_cali: bool,

    /// Skip first-layer inspection
    #[arg(long)]
    pub no_layer_inspect: bool,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to upload
    pub file: PathBuf,

    /// Name on the printer's storage (defaults to the local file name)
    #[arg(long)]
    pub remote_name: Option<String>,
}

// ── Discover ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DiscoverArgs {
    /// Seconds to listen for answers
    #[arg(long, short = 't', default_value = "3")]
    pub wait: u64,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Show the effective configuration (access codes redacted)
    Show,

    /// Make a configured printer the default
    Use {
        /// Printer name from the config file
        name: String,
    },

    /// Store a printer's access code in the system keyring
    SetAccessCode {
        /// Access code; prompted for when omitted
        #[arg(long)]
        code: Option<String>,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
