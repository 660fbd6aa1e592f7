//! Configuration for the lanprint tools.
//!
//! TOML printer profiles, access-code resolution (env + keyring +
//! plaintext), and translation to `lanprint_core::AgentConfig` and
//! `lanprint_core::Device`. The core crate never reads files; this crate
//! does it for the CLI.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lanprint_core::{AgentConfig, Device, DeviceCredentials, PrinterInfo, TlsVerification};

/// Keyring service name for stored access codes.
const KEYRING_SERVICE: &str = "lanprint";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no access code configured for printer '{printer}'")]
    NoCredentials { printer: String },

    #[error("unknown printer '{0}'")]
    UnknownPrinter(String),

    #[error("no printer selected; pass --printer or set default_printer")]
    NoPrinterSelected,

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Printer used when none is named on the command line.
    pub default_printer: Option<String>,

    /// Agent tuning shared by every printer.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named printer profiles.
    #[serde(default)]
    pub printers: HashMap<String, PrinterProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Pause between upload and print start.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Report failed connects through the connect callback.
    #[serde(default = "default_true")]
    pub report_connect_failures: bool,

    /// Directory holding the printer CA certificate.
    pub cert_dir: Option<PathBuf>,

    /// CA certificate file name inside `cert_dir`.
    pub cert_file: Option<String>,

    #[serde(default = "default_plate_path")]
    pub plate_path: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            connect_timeout_secs: default_connect_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            keep_alive_secs: default_keep_alive(),
            report_connect_failures: true,
            cert_dir: None,
            cert_file: None,
            plate_path: default_plate_path(),
        }
    }
}

fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_upload_timeout() -> u64 {
    600
}
fn default_keep_alive() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_plate_path() -> String {
    "Metadata/plate_1.gcode".into()
}

/// One printer on the LAN.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterProfile {
    /// Printer serial; also its MQTT device id.
    pub dev_id: String,

    /// IP address or host name.
    pub host: String,

    /// Model code (e.g. "C12", "3DPrinter-X1-Carbon").
    pub model: Option<String>,

    /// Display name. Defaults to the profile name.
    pub name: Option<String>,

    #[serde(default = "default_username")]
    pub username: String,

    /// Access code (plaintext; prefer keyring or env var).
    pub access_code: Option<String>,

    /// Environment variable holding the access code.
    pub access_code_env: Option<String>,

    /// Speak TLS to the printer.
    #[serde(default = "default_true")]
    pub tls: bool,
}

fn default_username() -> String {
    "bblp".into()
}

impl Config {
    /// Look up `name`, falling back to `default_printer`, then to the only
    /// configured printer.
    pub fn printer(&self, name: Option<&str>) -> Result<(String, &PrinterProfile), ConfigError> {
        let name = match name.or(self.default_printer.as_deref()) {
            Some(name) => name.to_owned(),
            None if self.printers.len() == 1 => self
                .printers
                .keys()
                .next()
                .cloned()
                .ok_or(ConfigError::NoPrinterSelected)?,
            None => return Err(ConfigError::NoPrinterSelected),
        };
        let profile = self
            .printers
            .get(&name)
            .ok_or_else(|| ConfigError::UnknownPrinter(name.clone()))?;
        Ok((name, profile))
    }

    /// Configured printers with a literal IP, as discovery results.
    pub fn static_printers(&self) -> Vec<PrinterInfo> {
        let mut printers: Vec<PrinterInfo> = self
            .printers
            .iter()
            .filter_map(|(key, p)| {
                let ip: IpAddr = p.host.parse().ok()?;
                Some(PrinterInfo {
                    ip,
                    serial: p.dev_id.clone(),
                    model: p.model.clone().unwrap_or_default(),
                    name: p.name.clone().unwrap_or_else(|| key.clone()),
                    firmware: None,
                })
            })
            .collect();
        printers.sort_by(|a, b| a.serial.cmp(&b.serial));
        printers
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "lanprint", "lanprint").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("lanprint");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + `LANPRINT_*` environment variables.
///
/// Nested keys use a double underscore: `LANPRINT_DEFAULTS__SETTLE_DELAY_MS`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LANPRINT_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a printer's access code: env var, then keyring, then plaintext.
pub fn resolve_access_code(
    profile: &PrinterProfile,
    printer: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's access_code_env → env var lookup
    if let Some(ref env_name) = profile.access_code_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(printer)) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref code) = profile.access_code {
        return Ok(SecretString::from(code.clone()));
    }

    Err(ConfigError::NoCredentials {
        printer: printer.into(),
    })
}

/// Store a printer's access code in the system keyring.
pub fn store_access_code(printer: &str, code: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(printer))?.set_password(code)?;
    Ok(())
}

fn keyring_user(printer: &str) -> String {
    format!("{printer}/access-code")
}

// ── Translation into core types ─────────────────────────────────────

/// Agent tuning from the `[defaults]` table.
pub fn to_agent_config(defaults: &Defaults) -> AgentConfig {
    let tls = match (&defaults.cert_dir, &defaults.cert_file) {
        (Some(dir), Some(file)) => TlsVerification::from_cert_file(dir, file),
        _ => TlsVerification::DangerAcceptInvalid,
    };

    AgentConfig {
        settle_delay: Duration::from_millis(defaults.settle_delay_ms),
        connect_timeout: Duration::from_secs(defaults.connect_timeout_secs),
        upload_timeout: Duration::from_secs(defaults.upload_timeout_secs),
        keep_alive: Duration::from_secs(defaults.keep_alive_secs),
        report_connect_failures: defaults.report_connect_failures,
        tls,
        plate_path: defaults.plate_path.clone(),
        ..AgentConfig::default()
    }
}

/// Build a connectable `Device` from a profile.
pub fn profile_to_device(profile: &PrinterProfile, printer: &str) -> Result<Device, ConfigError> {
    if profile.dev_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "dev_id".into(),
            reason: format!("printer '{printer}' has no device id"),
        });
    }
    if profile.host.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("printer '{printer}' has no host"),
        });
    }

    let credentials = DeviceCredentials {
        username: profile.username.clone(),
        password: resolve_access_code(profile, printer)?,
    };
    Ok(Device::new(
        profile.dev_id.clone(),
        profile.host.clone(),
        credentials,
        profile.tls,
    ))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_translate_to_agent_config() {
        let cfg = to_agent_config(&Defaults::default());
        assert_eq!(cfg.settle_delay, Duration::from_secs(1));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.tls, TlsVerification::DangerAcceptInvalid);
        assert_eq!(cfg.plate_path, "Metadata/plate_1.gcode");
    }

    #[test]
    fn cert_dir_and_file_select_custom_ca() {
        let defaults = Defaults {
            cert_dir: Some("/etc/lanprint".into()),
            cert_file: Some("printer.cer".into()),
            ..Defaults::default()
        };
        assert_eq!(
            to_agent_config(&defaults).tls,
            TlsVerification::CustomCa(PathBuf::from("/etc/lanprint/printer.cer"))
        );
    }

    #[test]
    fn single_printer_is_picked_without_a_default() {
        let mut cfg = Config::default();
        cfg.printers.insert(
            "shop".into(),
            PrinterProfile {
                dev_id: "01P00A000000001".into(),
                host: "192.168.1.40".into(),
                model: Some("C12".into()),
                name: None,
                username: default_username(),
                access_code: Some("12345678".into()),
                access_code_env: None,
                tls: true,
            },
        );

        let (name, profile) = cfg.printer(None).unwrap();
        assert_eq!(name, "shop");
        assert_eq!(profile.dev_id, "01P00A000000001");
        assert!(matches!(
            cfg.printer(Some("attic")),
            Err(ConfigError::UnknownPrinter(_))
        ));

        let statics = cfg.static_printers();
        assert_eq!(statics.len(), 1);
        assert_eq!(statics[0].name, "shop");
    }

    #[test]
    fn empty_config_has_no_printer() {
        assert!(matches!(
            Config::default().printer(None),
            Err(ConfigError::NoPrinterSelected)
        ));
    }
}
