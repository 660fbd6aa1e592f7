// ── Runtime agent configuration ──
//
// These types describe *how* to reach printers and pace print jobs.
// They carry credential data and tuning, but never touch disk.
// The CLI or host constructs an `AgentConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use lanprint_api::TlsMode;
use lanprint_api::command::DEFAULT_PLATE_PATH;
use secrecy::SecretString;

/// Remote file name used when the host does not pick one.
pub const DEFAULT_REMOTE_NAME: &str = "print.gcode.3mf";

/// Username + access code for one printer.
#[derive(Debug, Clone)]
pub struct DeviceCredentials {
    pub username: String,
    pub password: SecretString,
}

impl DeviceCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// LAN-mode credentials: the fixed `bblp` account plus the access code.
    pub fn access_code(code: impl Into<String>) -> Self {
        Self::new(lanprint_api::link::DEFAULT_USERNAME, code)
    }
}

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// Verify against a CA certificate file, matching the device serial.
    CustomCa(PathBuf),
    /// Skip verification (printers use self-signed certs). Default.
    #[default]
    DangerAcceptInvalid,
}

impl TlsVerification {
    /// Certificate file composed from a directory and a file name.
    pub fn from_cert_file(folder: impl Into<PathBuf>, filename: &str) -> Self {
        Self::CustomCa(folder.into().join(filename))
    }

    pub(crate) fn to_mode(&self) -> TlsMode {
        match self {
            Self::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            Self::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        }
    }
}

/// Tuning for the agent. Built by the CLI/host; core never reads config files.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Pause between upload completion and the start command.
    pub settle_delay: Duration,
    /// Upper bound on opening a message-bus session.
    pub connect_timeout: Duration,
    /// Upper bound on one file upload.
    pub upload_timeout: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Raise `on_connected(1, ..)` when a connect attempt fails.
    pub report_connect_failures: bool,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Plate gcode path inside the project archive.
    pub plate_path: String,
    /// Queue depth of each session direction.
    pub channel_capacity: usize,
    /// Pause between SSDP searches while continuous discovery runs.
    pub discovery_interval: Duration,
    /// How long each SSDP search listens for answers.
    pub discovery_window: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(600),
            keep_alive: Duration::from_secs(5),
            report_connect_failures: true,
            tls: TlsVerification::default(),
            plate_path: DEFAULT_PLATE_PATH.into(),
            channel_capacity: 64,
            discovery_interval: Duration::from_secs(10),
            discovery_window: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cert_path_joins_folder_and_file() {
        let tls = TlsVerification::from_cert_file("/opt/certs", "printer.cer");
        assert_eq!(
            tls,
            TlsVerification::CustomCa(PathBuf::from("/opt/certs/printer.cer"))
        );
    }

    #[test]
    fn defaults_match_printer_expectations() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.settle_delay, Duration::from_secs(1));
        assert_eq!(cfg.keep_alive, Duration::from_secs(5));
        assert_eq!(cfg.plate_path, "Metadata/plate_1.gcode");
        assert!(cfg.report_connect_failures);
    }
}
