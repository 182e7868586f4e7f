//! Link and run state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport used to reach the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// USB serial port
    Usb,
    /// Raw TCP on the telnet port
    Telnet,
    /// WebSocket bridge on an ESP8266
    #[serde(alias = "esp8266")]
    Esp,
}

impl TransportKind {
    /// Names announced to viewers as available interfaces
    pub const INTERFACES: [&'static str; 3] = ["USB", "ESP8266", "Telnet"];
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Usb => write!(f, "usb"),
            TransportKind::Telnet => write!(f, "telnet"),
            TransportKind::Esp => write!(f, "esp8266"),
        }
    }
}

/// Lifecycle state of the machine link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No connection
    #[default]
    Disconnected,
    /// Link open, firmware not yet identified
    Connecting,
    /// Ready for commands
    Idle,
    /// A job is streaming
    Running,
    /// Job dispatch frozen
    Paused,
    /// Firmware reported an alarm
    Alarm,
    /// Queue was flushed by stop
    Stopped,
}

impl RunState {
    /// True while a connection is bound
    pub fn is_connected(&self) -> bool {
        !matches!(self, RunState::Disconnected)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Disconnected => "disconnected",
            RunState::Connecting => "connecting",
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Alarm => "alarm",
            RunState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Job lifecycle notification sent to viewers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Resumed,
    Stopped,
    Finished,
}

/// A serial port offered to viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub path: String,
    /// Human readable description
    pub description: String,
    /// USB manufacturer if known
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub manufacturer: Option<String>,
}
