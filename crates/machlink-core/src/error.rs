//! Error handling for machlink
//!
//! Errors are grouped by the layer that raises them:
//! - Controller errors (action rejected before any machine I/O)
//! - Connection errors (transport failures)
//! - Firmware errors (detection failures and faults reported by the firmware)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Controller error type
///
/// Raised by the session when an action cannot be carried out with the
/// current link state. No machine I/O happens when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// No machine connection is open
    #[error("Machine connection not open")]
    NotConnected,

    /// A connection is already open
    #[error("Already connected to {target}")]
    AlreadyConnected {
        /// The target the open connection points at.
        target: String,
    },

    /// Malformed action payload
    #[error("Invalid parameters: {reason}")]
    InvalidParameters {
        /// What was wrong with the payload.
        reason: String,
    },

    /// The bound firmware has no wire form for the command
    #[error("{command} not supported by {firmware}")]
    CommandNotSupported {
        /// The action that was requested.
        command: String,
        /// The firmware bound to the connection.
        firmware: String,
    },
}

/// Connection error type
///
/// Failures of the serial, telnet or WebSocket link itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Failed to open the link
    #[error("Failed to open {target}: {reason}")]
    FailedToOpen {
        /// Port path or host.
        target: String,
        /// The reason the link failed to open.
        reason: String,
    },

    /// Opening the link took too long
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Link dropped while open
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// TCP connection error
    #[error("TCP connection error: {reason}")]
    TcpError {
        /// The reason for the TCP error.
        reason: String,
    },

    /// WebSocket error
    #[error("WebSocket error: {reason}")]
    WebSocketError {
        /// The reason for the WebSocket error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Firmware error type
///
/// Detection failures and faults the firmware reports on the wire.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FirmwareError {
    /// The detection cascade ran out without a match
    #[error("No supported firmware detected on {target}")]
    UnsupportedFirmware {
        /// Port path or host that was probed.
        target: String,
    },

    /// The firmware raised an alarm
    #[error("ALARM: {code} - {message}")]
    Alarm {
        /// The alarm code.
        code: u32,
        /// Readable alarm text.
        message: String,
    },

    /// The firmware rejected a line
    #[error("error: {code} - {message}")]
    ProtocolError {
        /// The error code.
        code: u32,
        /// Readable error text.
        message: String,
    },
}

/// Main error type for machlink
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Firmware error
    #[error(transparent)]
    Firmware(#[from] FirmwareError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new generic error
    pub fn other(message: impl Into<String>) -> Self {
        Error::Other(message.into())
    }

    /// Shorthand for an invalid-parameters rejection
    pub fn invalid_parameters(reason: impl Into<String>) -> Self {
        ControllerError::InvalidParameters {
            reason: reason.into(),
        }
        .into()
    }

    /// Shorthand for a command the bound firmware cannot express
    pub fn not_supported(command: impl Into<String>, firmware: impl std::fmt::Display) -> Self {
        ControllerError::CommandNotSupported {
            command: command.into(),
            firmware: firmware.to_string(),
        }
        .into()
    }

    /// Check if this is a controller error
    pub fn is_controller_error(&self) -> bool {
        matches!(self, Error::Controller(_))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if this is a firmware error
    pub fn is_firmware_error(&self) -> bool {
        matches!(self, Error::Firmware(_))
    }

    /// Check if the action failed because no link is open
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::NotConnected))
    }
}

/// Result type for machlink operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_error_display() {
        let err = ControllerError::InvalidParameters {
            reason: "jog needs a distance".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameters: jog needs a distance");
        assert_eq!(
            ControllerError::NotConnected.to_string(),
            "Machine connection not open"
        );
    }

    #[test]
    fn test_firmware_error_display() {
        let err = FirmwareError::Alarm {
            code: 1,
            message: "Hard limit".to_string(),
        };
        assert_eq!(err.to_string(), "ALARM: 1 - Hard limit");
    }

    #[test]
    fn test_error_classification() {
        let err: Error = ControllerError::NotConnected.into();
        assert!(err.is_controller_error());
        assert!(err.is_not_connected());

        let err: Error = ConnectionError::ConnectionLost {
            reason: "eof".to_string(),
        }
        .into();
        assert!(err.is_connection_error());
        assert!(!err.is_not_connected());

        let err: Error = FirmwareError::ProtocolError {
            code: 20,
            message: "Unsupported or invalid g-code command".to_string(),
        }
        .into();
        assert!(err.is_firmware_error());
        assert!(!err.is_controller_error());
        assert_eq!(
            err.to_string(),
            "error: 20 - Unsupported or invalid g-code command"
        );

        let err = Error::not_supported("home x", "grbl");
        assert_eq!(err.to_string(), "home x not supported by grbl");
    }
}
