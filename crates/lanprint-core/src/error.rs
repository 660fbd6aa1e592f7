// ── Core error types ──
//
// Domain failures of the agent. Consumers never see MQTT return codes or
// FTP replies directly: the `From<lanprint_api::Error>` impl folds transport
// errors into this taxonomy, and `status_code()` flattens it for the host
// boundary.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Cannot connect to printer {device_id}: {reason}")]
    ConnectFailed { device_id: String, reason: String },

    #[error("Printer {device_id} refused the credentials: {message}")]
    AuthenticationFailed { device_id: String, message: String },

    #[error("Printer {device_id} is not connected")]
    NotConnected { device_id: String },

    #[error("Connect attempt for {device_id} was superseded by a newer one")]
    Superseded { device_id: String },

    #[error("Failed to send to {device_id}: {reason}")]
    SendFailed { device_id: String, reason: String },

    // ── Job errors ───────────────────────────────────────────────────
    #[error("File transfer to {device_id} failed: {reason}")]
    TransferFailed { device_id: String, reason: String },

    #[error("Job cancelled")]
    Cancelled,

    // ── Input errors ─────────────────────────────────────────────────
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Classify a failed connect. Refused credentials keep their own kind.
    pub(crate) fn connect(device_id: &str, err: &lanprint_api::Error) -> Self {
        if err.is_auth_failure() {
            Self::AuthenticationFailed {
                device_id: device_id.to_owned(),
                message: err.to_string(),
            }
        } else {
            Self::ConnectFailed {
                device_id: device_id.to_owned(),
                reason: err.to_string(),
            }
        }
    }

    /// Status code returned across the host boundary. `0` is success.
    ///
    /// `-7` is reserved: timeouts report as the failure of the stage that
    /// timed out.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::InvalidArgument { .. } => -1,
            Self::ConnectFailed { .. } | Self::AuthenticationFailed { .. } => -2,
            Self::NotConnected { .. } => -3,
            Self::SendFailed { .. } => -4,
            Self::TransferFailed { .. } => -5,
            Self::Cancelled => -6,
            Self::Superseded { .. } => -8,
            Self::Config { .. } | Self::Internal(_) => -9,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<lanprint_api::Error> for CoreError {
    fn from(err: lanprint_api::Error) -> Self {
        use lanprint_api::Error as Api;

        match err {
            Api::Connect { address, reason } => CoreError::ConnectFailed {
                device_id: String::new(),
                reason: format!("{address}: {reason}"),
            },
            Api::Authentication { message } => CoreError::AuthenticationFailed {
                device_id: String::new(),
                message,
            },
            Api::Tls(msg) => CoreError::ConnectFailed {
                device_id: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::ChannelClosed => CoreError::NotConnected {
                device_id: String::new(),
            },
            Api::Mqtt(reason) => CoreError::SendFailed {
                device_id: String::new(),
                reason,
            },
            // Only the file channel dials under its own deadline.
            Api::Timeout {
                operation,
                timeout_secs,
            } => CoreError::TransferFailed {
                device_id: String::new(),
                reason: format!("{operation} timed out after {timeout_secs}s"),
            },
            Api::Ftp { code, message } => CoreError::TransferFailed {
                device_id: String::new(),
                reason: format!("{code} {message}"),
            },
            Api::InvalidResponse(msg) => CoreError::TransferFailed {
                device_id: String::new(),
                reason: msg,
            },
            Api::Serialization(e) => CoreError::invalid(e.to_string()),
            Api::Discovery(msg) => CoreError::Internal(format!("discovery: {msg}")),
            Api::Io(e) => CoreError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_distinct_and_negative() {
        let errors = [
            CoreError::invalid("x"),
            CoreError::ConnectFailed {
                device_id: "P1".into(),
                reason: "x".into(),
            },
            CoreError::NotConnected {
                device_id: "P1".into(),
            },
            CoreError::SendFailed {
                device_id: "P1".into(),
                reason: "x".into(),
            },
            CoreError::TransferFailed {
                device_id: "P1".into(),
                reason: "x".into(),
            },
            CoreError::Cancelled,
            CoreError::Superseded {
                device_id: "P1".into(),
            },
            CoreError::Internal("x".into()),
        ];
        let mut codes: Vec<i32> = errors.iter().map(CoreError::status_code).collect();
        assert!(codes.iter().all(|c| *c < 0));
        assert!(!codes.contains(&-7));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn refused_credentials_keep_their_kind() {
        let refused = lanprint_api::Error::Authentication {
            message: "bad user name or password".into(),
        };
        let err = CoreError::connect("P1", &refused);
        assert!(matches!(
            &err,
            CoreError::AuthenticationFailed { device_id, .. } if device_id == "P1"
        ));
        assert_eq!(err.status_code(), -2);

        let unreachable = lanprint_api::Error::Connect {
            address: "10.0.0.5:8883".into(),
            reason: "connection refused".into(),
        };
        assert!(matches!(
            CoreError::connect("P1", &unreachable),
            CoreError::ConnectFailed { .. }
        ));
    }

    #[test]
    fn converted_connect_error_keeps_address_out_of_device_id() {
        let err: CoreError = lanprint_api::Error::Connect {
            address: "10.0.0.5:8883".into(),
            reason: "connection refused".into(),
        }
        .into();
        let CoreError::ConnectFailed { device_id, reason } = err else {
            panic!("expected ConnectFailed");
        };
        assert!(device_id.is_empty());
        assert_eq!(reason, "10.0.0.5:8883: connection refused");
    }

    #[test]
    fn file_channel_dial_timeout_is_transfer_failure() {
        let err: CoreError = lanprint_api::Error::Timeout {
            operation: "FTPS connect",
            timeout_secs: 10,
        }
        .into();
        assert_eq!(err.status_code(), -5);
    }

    #[test]
    fn ftp_reply_becomes_transfer_failure() {
        let err: CoreError = lanprint_api::Error::Ftp {
            code: 553,
            message: "Could not create file.".into(),
        }
        .into();
        assert_eq!(err.status_code(), -5);
    }
}
