//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use lanprint_config::ConfigError;
use lanprint_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONFIG: i32 = 4;
    pub const TRANSFER: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const CANCELLED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to printer {printer}: {reason}")]
    #[diagnostic(
        code(lanprint::connection_failed),
        help(
            "Check that the printer is powered on, in LAN mode, and reachable.\n\
             Try: lanprint discover"
        )
    )]
    ConnectionFailed { printer: String, reason: String },

    #[error("Printer {printer} rejected the access code")]
    #[diagnostic(
        code(lanprint::auth_failed),
        help(
            "The access code is shown on the printer's network settings screen.\n\
             Run: lanprint config set-access-code --printer <name>"
        )
    )]
    AuthFailed { printer: String },

    #[error("Printer {printer} is not connected")]
    #[diagnostic(code(lanprint::not_connected))]
    NotConnected { printer: String },

    // ── Jobs ─────────────────────────────────────────────────────────
    #[error("File transfer to {printer} failed: {reason}")]
    #[diagnostic(
        code(lanprint::transfer_failed),
        help("Check free space on the printer's storage card and that it is inserted.")
    )]
    TransferFailed { printer: String, reason: String },

    #[error("Could not send to {printer}: {reason}")]
    #[diagnostic(code(lanprint::send_failed))]
    SendFailed { printer: String, reason: String },

    #[error("Cancelled")]
    #[diagnostic(code(lanprint::cancelled))]
    Cancelled,

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(lanprint::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("No printer configured")]
    #[diagnostic(
        code(lanprint::no_config),
        help(
            "Add a [printers.<name>] table with dev_id, host and access_code.\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(lanprint::config))]
    Config(#[from] ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(lanprint::json), help("Check the JSON and try again."))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NotConnected { .. } | Self::SendFailed { .. } => {
                exit_code::CONNECTION
            }
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::TransferFailed { .. } => exit_code::TRANSFER,
            Self::Cancelled => exit_code::CANCELLED,
            Self::Validation { .. } | Self::Json(_) => exit_code::USAGE,
            Self::NoConfig { .. } | Self::Config(_) => exit_code::CONFIG,
            Self::Io(_) | Self::Internal(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectFailed { device_id, reason } => CliError::ConnectionFailed {
                printer: device_id,
                reason,
            },

            CoreError::AuthenticationFailed { device_id, .. } => {
                CliError::AuthFailed { printer: device_id }
            }

            CoreError::NotConnected { device_id } | CoreError::Superseded { device_id } => {
                CliError::NotConnected { printer: device_id }
            }

            CoreError::SendFailed { device_id, reason } => CliError::SendFailed {
                printer: device_id,
                reason,
            },

            CoreError::TransferFailed { device_id, reason } => CliError::TransferFailed {
                printer: device_id,
                reason,
            },

            CoreError::Cancelled => CliError::Cancelled,

            CoreError::InvalidArgument { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
