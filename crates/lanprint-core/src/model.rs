// ── Domain types ──

use serde::{Deserialize, Serialize};
use strum::Display;

use lanprint_api::{Endpoint, TransportSecurity};

use crate::config::{DeviceCredentials, TlsVerification};
use crate::error::CoreError;

/// A printer the agent has been asked to talk to.
#[derive(Debug, Clone)]
pub struct Device {
    /// Printer serial.
    pub id: String,
    /// Host name or IP address.
    pub address: String,
    pub credentials: DeviceCredentials,
    pub use_tls: bool,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        credentials: DeviceCredentials,
        use_tls: bool,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            credentials,
            use_tls,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::invalid("device id must not be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(CoreError::invalid(format!(
                "printer {} has no network address",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, tls: &TlsVerification) -> Endpoint {
        Endpoint {
            device_id: self.id.clone(),
            address: self.address.clone(),
            username: self.credentials.username.clone(),
            password: self.credentials.password.clone(),
            security: if self.use_tls {
                TransportSecurity::Tls(tls.to_mode())
            } else {
                TransportSecurity::Plain
            },
        }
    }
}

/// Per-device session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Status passed to the host's `on_connected` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectStatus {
    Connected,
    Failed,
    Lost,
}

impl ConnectStatus {
    pub fn code(self) -> i32 {
        match self {
            Self::Connected => 0,
            Self::Failed => 1,
            Self::Lost => 2,
        }
    }
}

/// Headline fields of the merged `print` report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// `IDLE`, `PREPARE`, `RUNNING`, `PAUSE`, `FINISH`, `FAILED`, ...
    pub gcode_state: Option<String>,
    pub percent: Option<u8>,
    /// Minutes.
    pub remaining: Option<u32>,
    pub layer: Option<u32>,
    pub total_layers: Option<u32>,
    pub nozzle_temp: Option<f64>,
    pub bed_temp: Option<f64>,
    pub subtask_name: Option<String>,
}

impl ReportSummary {
    /// Pull the summary out of a merged report document.
    pub fn from_report(report: &serde_json::Value) -> Self {
        let print = &report["print"];
        let uint = |key: &str| {
            print[key]
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
        };

        Self {
            gcode_state: print["gcode_state"].as_str().map(str::to_owned),
            percent: print["mc_percent"]
                .as_u64()
                .and_then(|v| u8::try_from(v.min(100)).ok()),
            remaining: uint("mc_remaining_time"),
            layer: uint("layer_num"),
            total_layers: uint("total_layer_num"),
            nozzle_temp: print["nozzle_temper"].as_f64(),
            bed_temp: print["bed_temper"].as_f64(),
            subtask_name: print["subtask_name"].as_str().map(str::to_owned),
        }
    }
}

/// Deep-merge `delta` into `base`. Objects merge key by key; anything
/// else replaces.
pub(crate) fn merge_report(base: &mut serde_json::Value, delta: serde_json::Value) {
    match (base, delta) {
        (serde_json::Value::Object(base), serde_json::Value::Object(delta)) => {
            for (key, value) in delta {
                match base.get_mut(&key) {
                    Some(slot) => merge_report(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn merge_keeps_untouched_fields() {
        let mut base =
            json!({"print": {"gcode_state": "RUNNING", "mc_percent": 10, "ams": [1, 2]}});
        merge_report(&mut base, json!({"print": {"mc_percent": 20, "ams": [3]}}));
        assert_eq!(
            base,
            json!({"print": {"gcode_state": "RUNNING", "mc_percent": 20, "ams": [3]}})
        );
    }

    #[test]
    fn summary_reads_print_block() {
        let report = json!({"print": {
            "gcode_state": "RUNNING",
            "mc_percent": 42,
            "mc_remaining_time": 73,
            "layer_num": 12,
            "total_layer_num": 200,
            "nozzle_temper": 219.5,
            "bed_temper": 55.0
        }});
        let summary = ReportSummary::from_report(&report);
        assert_eq!(summary.gcode_state.as_deref(), Some("RUNNING"));
        assert_eq!(summary.percent, Some(42));
        assert_eq!(summary.remaining, Some(73));
        assert_eq!(summary.layer, Some(12));
        assert_eq!(summary.total_layers, Some(200));
        assert_eq!(summary.nozzle_temp, Some(219.5));
    }

    #[test]
    fn empty_device_id_is_rejected() {
        let device = Device::new(" ", "10.0.0.5", DeviceCredentials::access_code("pw"), true);
        assert_eq!(device.validate().unwrap_err().status_code(), -1);
    }

    #[test]
    fn connect_status_codes() {
        assert_eq!(ConnectStatus::Connected.code(), 0);
        assert_eq!(ConnectStatus::Failed.code(), 1);
        assert_eq!(ConnectStatus::Lost.code(), 2);
    }
}
