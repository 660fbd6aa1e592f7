// Wire payloads and topic names for the printer's message bus.

use serde::{Deserialize, Serialize};

/// Default metadata path of the first plate inside a sliced project.
pub const DEFAULT_PLATE_PATH: &str = "Metadata/plate_1.gcode";

/// Topic the printer publishes state reports on.
pub fn report_topic(device_id: &str) -> String {
    format!("device/{device_id}/report")
}

/// Topic the printer accepts commands on.
pub fn request_topic(device_id: &str) -> String {
    format!("device/{device_id}/request")
}

/// URL the printer resolves against its own storage for a transferred file.
pub fn storage_url(remote_name: &str) -> String {
    format!("ftp://{remote_name}")
}

/// Feature toggles carried by a print start command.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    pub timelapse: bool,
    pub bed_leveling: bool,
    pub flow_cali: bool,
    pub vibration_cali: bool,
    pub layer_inspect: bool,
    pub use_ams: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            timelapse: false,
            bed_leveling: true,
            flow_cali: false,
            vibration_cali: false,
            layer_inspect: true,
            use_ams: true,
        }
    }
}

/// `project_file` command body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFileCommand {
    pub sequence_id: u64,
    pub command: String,
    /// Plate gcode path inside the project archive.
    pub param: String,
    pub subtask_name: String,
    pub url: String,
    #[serde(flatten)]
    pub options: PrintOptions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ams_mapping: Vec<i32>,
}

impl ProjectFileCommand {
    pub fn new(
        sequence_id: u64,
        plate_path: impl Into<String>,
        remote_name: &str,
        options: PrintOptions,
        ams_mapping: Vec<i32>,
    ) -> Self {
        Self {
            sequence_id,
            command: "project_file".into(),
            param: plate_path.into(),
            subtask_name: remote_name.to_owned(),
            url: storage_url(remote_name),
            options,
            ams_mapping,
        }
    }

    /// Display name shown on the printer. Defaults to the remote file name.
    #[must_use]
    pub fn with_subtask_name(mut self, name: impl Into<String>) -> Self {
        self.subtask_name = name.into();
        self
    }

    /// Serialize wrapped in the `{"print": ...}` envelope.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&PrintEnvelope { print: self })
    }
}

#[derive(Serialize)]
struct PrintEnvelope<'a> {
    print: &'a ProjectFileCommand,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn topics_are_namespaced_by_device() {
        assert_eq!(report_topic("P1"), "device/P1/report");
        assert_eq!(request_topic("P1"), "device/P1/request");
    }

    #[test]
    fn project_file_payload_shape() {
        let options = PrintOptions {
            timelapse: false,
            bed_leveling: false,
            flow_cali: false,
            vibration_cali: false,
            layer_inspect: false,
            use_ams: true,
        };
        let cmd =
            ProjectFileCommand::new(7, DEFAULT_PLATE_PATH, "print.gcode.3mf", options, vec![]);
        let value: serde_json::Value = serde_json::from_slice(&cmd.to_payload().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "print": {
                    "sequence_id": 7,
                    "command": "project_file",
                    "param": "Metadata/plate_1.gcode",
                    "subtask_name": "print.gcode.3mf",
                    "url": "ftp://print.gcode.3mf",
                    "timelapse": false,
                    "bed_leveling": false,
                    "flow_cali": false,
                    "vibration_cali": false,
                    "layer_inspect": false,
                    "use_ams": true
                }
            })
        );
    }

    #[test]
    fn ams_mapping_included_only_when_present() {
        let cmd = ProjectFileCommand::new(
            1,
            DEFAULT_PLATE_PATH,
            "benchy.3mf",
            PrintOptions::default(),
            vec![0, 2, -1],
        );
        let value: serde_json::Value = serde_json::from_slice(&cmd.to_payload().unwrap()).unwrap();
        assert_eq!(value["print"]["ams_mapping"], json!([0, 2, -1]));
    }
}
