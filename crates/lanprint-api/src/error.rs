use thiserror::Error;

/// Top-level error type for the `lanprint-api` crate.
///
/// Covers every failure mode of the LAN transports: the MQTT message bus,
/// the FTPS file channel, TLS setup and SSDP discovery.
/// `lanprint-core` maps these into its domain taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Message bus ─────────────────────────────────────────────────
    /// The broker could not be reached or the handshake failed.
    #[error("Connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    /// The printer rejected the access code.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// MQTT client request failed (queue closed, encode failure, ...).
    #[error("MQTT error: {0}")]
    Mqtt(String),

    /// The link to the printer is gone.
    #[error("Channel closed")]
    ChannelClosed,

    // ── Shared ──────────────────────────────────────────────────────
    /// A bounded wait expired.
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: &'static str,
        timeout_secs: u64,
    },

    /// TLS configuration or handshake error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── File channel ────────────────────────────────────────────────
    /// The FTP server answered with an unexpected reply.
    #[error("FTP server replied {code}: {message}")]
    Ftp { code: u16, message: String },

    /// A reply or datagram could not be parsed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // ── Discovery ───────────────────────────────────────────────────
    #[error("Discovery failed: {0}")]
    Discovery(String),

    // ── Data ────────────────────────────────────────────────────────
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if retrying the same operation might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Timeout { .. } | Self::ChannelClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            ),
            // 4xx replies are transient by definition in RFC 959
            Self::Ftp { code, .. } => (400..500).contains(code),
            _ => false,
        }
    }

    /// Returns `true` if this error means the credentials were refused.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Ftp { code: 530, .. } => true,
            _ => false,
        }
    }
}
