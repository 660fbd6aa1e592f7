//! Printer discovery via SSDP.
//!
//! Printers answer an `M-SEARCH` on a non-standard port (1990) and also
//! announce themselves there periodically.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::Error;

const SSDP_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 255, 255, 250)), 1990);

const SEARCH_REQUEST: &str = concat!(
    "M-SEARCH * HTTP/1.1\r\n",
    "HOST: 239.255.255.250:1990\r\n",
    "MAN: \"ssdp:discover\"\r\n",
    "MX: 3\r\n",
    "ST: urn:bambulab-com:device:3dprinter:1\r\n",
    "\r\n"
);

/// A printer found on the network or taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrinterInfo {
    pub ip: IpAddr,
    /// Serial number; doubles as the device id.
    pub serial: String,
    /// Model code as reported (e.g. `C12`, `3DPrinter-X1-Carbon`).
    pub model: String,
    pub name: String,
    pub firmware: Option<String>,
}

/// Search the local network for `timeout`, de-duplicating by serial.
pub async fn discover(timeout: Duration) -> Result<Vec<PrinterInfo>, Error> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| Error::Discovery(e.to_string()))?;

    socket
        .send_to(SEARCH_REQUEST.as_bytes(), SSDP_ADDR)
        .await
        .map_err(|e| Error::Discovery(e.to_string()))?;
    debug!(timeout_ms = timeout.as_millis(), "sent SSDP search");

    let deadline = Instant::now() + timeout;
    let mut printers: Vec<PrinterInfo> = Vec::new();
    let mut buf = [0u8; 2048];

    loop {
        let recv = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let Ok(result) = recv else { break };
        let (len, from) = result.map_err(|e| Error::Discovery(e.to_string()))?;

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            continue;
        };
        match parse_ssdp_response(text, from.ip()) {
            Some(info) if !printers.iter().any(|p| p.serial == info.serial) => {
                trace!(serial = %info.serial, ip = %info.ip, "printer answered");
                printers.push(info);
            }
            _ => {}
        }
    }

    debug!(count = printers.len(), "SSDP search finished");
    Ok(printers)
}

/// Parse one SSDP answer or `NOTIFY` datagram.
pub fn parse_ssdp_response(response: &str, ip: IpAddr) -> Option<PrinterInfo> {
    if !response.contains("bambulab") && !response.contains("Bambu") {
        return None;
    }

    let mut serial = None;
    let mut model = None;
    let mut name = None;
    let mut firmware = None;
    let mut location = None;

    for line in response.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            // uuid:SERIAL::urn:bambulab-com:device:3dprinter:1, or the bare serial
            "usn" => {
                let sn = value.strip_prefix("uuid:").unwrap_or(value);
                serial = sn.split("::").next().map(|s| s.trim().to_owned());
            }
            "location" => location = value.parse::<IpAddr>().ok(),
            "devmodel.bambu.com" => model = Some(value.to_owned()),
            "devname.bambu.com" => name = Some(value.to_owned()),
            "devversion.bambu.com" => firmware = Some(value.to_owned()),
            _ => {}
        }
    }

    let serial = serial.filter(|s| !s.is_empty())?;
    let model = model.unwrap_or_else(|| "Unknown".into());
    let name = name.unwrap_or_else(|| format!("Bambu {model}"));

    Some(PrinterInfo {
        ip: location.unwrap_or(ip),
        serial,
        model,
        name,
        firmware,
    })
}

/// Map a short model name to the code the host application expects.
/// Unknown names pass through unchanged.
pub fn device_type(model: &str) -> &str {
    match model.to_ascii_lowercase().as_str() {
        "x1c" | "x1-carbon" => "3DPrinter-X1-Carbon",
        "x1" => "3DPrinter-X1",
        "p1s" => "C12",
        "p1p" => "C11",
        "a1" => "N2S",
        "a1mini" | "a1-mini" => "N1",
        _ => model,
    }
}

/// Printer-arrival notice handed to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalNotice {
    pub dev_name: String,
    pub dev_id: String,
    pub dev_ip: String,
    pub dev_type: String,
    pub dev_signal: String,
    pub connect_type: String,
    pub bind_state: String,
}

impl From<&PrinterInfo> for ArrivalNotice {
    fn from(info: &PrinterInfo) -> Self {
        Self {
            dev_name: info.name.clone(),
            dev_id: info.serial.clone(),
            dev_ip: info.ip.to_string(),
            dev_type: device_type(&info.model).to_owned(),
            dev_signal: "0dbm".into(),
            connect_type: "lan".into(),
            bind_state: "free".into(),
        }
    }
}
