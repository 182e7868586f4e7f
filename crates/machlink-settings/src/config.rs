//! Configuration for the machlink gateway
//!
//! Supports JSON and TOML files. Every section has defaults, so a file only
//! needs to name the values it changes.
//!
//! Configuration is organized into sections:
//! - Viewer server (bind address, broadcast buffer)
//! - Connection defaults (transport, baud rate, timeouts)
//! - Flow control buffer sizes per firmware family
//! - Firmware detection timeouts
//! - Telemetry precision and poll intervals
//! - Job options and shell hooks
//! - Logging

use crate::error::{SettingsError, SettingsResult};
use machlink_core::TransportKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Viewer gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address the viewer WebSocket listens on
    pub bind: String,
    /// Events buffered per viewer before a slow viewer starts lagging
    pub event_buffer: usize,
    /// How often the serial port list is rescanned
    pub port_scan_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            event_buffer: 1024,
            port_scan_interval_ms: 2000,
        }
    }
}

/// Connection defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Transport used when a connect request does not name one
    pub transport: TransportKind,
    /// Baud rate for serial connections
    pub baud_rate: u32,
    /// TCP port for telnet links
    pub telnet_port: u16,
    /// Time allowed for the link to open
    pub timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::Usb,
            baud_rate: 115200,
            telnet_port: 23,
            timeout_ms: 5000,
        }
    }
}

/// Receive buffer sizes per firmware family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Grbl receive buffer in bytes
    pub grbl_buffer_size: usize,
    /// Smoothie line length limit, informational
    pub smoothie_buffer_size: usize,
    /// TinyG lines in flight
    pub tinyg_buffer_size: u32,
    /// Marlin / MarlinKimbra / Repetier lines in flight
    pub reprap_buffer_size: u32,
    /// RepRapFirmware lines in flight once identified
    pub reprapfirmware_buffer_size: u32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            grbl_buffer_size: 128,
            smoothie_buffer_size: 64,
            tinyg_buffer_size: 24,
            reprap_buffer_size: 2,
            reprapfirmware_buffer_size: 5,
        }
    }
}

/// Firmware detection timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Send ctrl-x instead of a newline when the link opens
    pub reset_on_connect: bool,
    /// Wait for a banner before sending `version`
    pub grbl_wait_ms: u64,
    /// Wait for a Smoothie reply before sending `{fb:n}`
    pub smoothie_wait_ms: u64,
    /// Wait for a TinyG reply before sending `M115`
    pub tinyg_wait_ms: u64,
    /// Overall deadline, 0 never gives up
    pub firmware_wait_ms: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            reset_on_connect: false,
            grbl_wait_ms: 1000,
            smoothie_wait_ms: 1000,
            tinyg_wait_ms: 1000,
            firmware_wait_ms: 4000,
        }
    }
}

/// Telemetry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Decimals kept on reported positions
    pub pos_decimals: u32,
    /// Status poll interval
    pub poll_interval_ms: u64,
    /// How often the remaining queue depth is reported during a job
    pub queue_report_interval_ms: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            pos_decimals: 3,
            poll_interval_ms: 250,
            queue_report_interval_ms: 500,
        }
    }
}

/// Job options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Compact whitespace and drop repeated motion words before queueing
    pub optimize_gcode: bool,
    /// Shell command run when a job starts
    pub on_start: Option<String>,
    /// Shell command run when a job finishes
    pub on_finish: Option<String>,
    /// Shell command run when a job is stopped
    pub on_abort: Option<String>,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub connection: ConnectionSettings,
    pub flow: FlowSettings,
    pub detection: DetectionSettings,
    pub telemetry: TelemetrySettings,
    pub job: JobSettings,
    pub logging: LoggingSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform config location, `<config dir>/machlink/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("machlink").join("config.toml"))
            .ok_or_else(|| SettingsError::ConfigDirectory("no config directory".to_string()))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load `path`, writing the defaults there first when it does not exist
    pub fn load_or_create(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            return Self::load_from_file(path);
        }
        let config = Self::default();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        config.save_to_file(path)?;
        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.server.bind.trim().is_empty() {
            return Err(SettingsError::invalid("server.bind", "must not be empty"));
        }
        if self.server.event_buffer == 0 {
            return Err(SettingsError::invalid("server.event_buffer", "must be > 0"));
        }

        if self.connection.baud_rate == 0 {
            return Err(SettingsError::invalid("connection.baud_rate", "must be > 0"));
        }
        if self.connection.timeout_ms == 0 {
            return Err(SettingsError::invalid("connection.timeout_ms", "must be > 0"));
        }

        // a zero budget would block every line forever
        if self.flow.grbl_buffer_size < 2 {
            return Err(SettingsError::invalid(
                "flow.grbl_buffer_size",
                "must be at least 2",
            ));
        }
        for (key, value) in [
            ("flow.tinyg_buffer_size", self.flow.tinyg_buffer_size),
            ("flow.reprap_buffer_size", self.flow.reprap_buffer_size),
            (
                "flow.reprapfirmware_buffer_size",
                self.flow.reprapfirmware_buffer_size,
            ),
        ] {
            if value == 0 {
                return Err(SettingsError::invalid(key, "must be > 0"));
            }
        }

        let d = &self.detection;
        if d.firmware_wait_ms > 0
            && d.firmware_wait_ms <= d.grbl_wait_ms + d.smoothie_wait_ms + d.tinyg_wait_ms
        {
            return Err(SettingsError::invalid(
                "detection.firmware_wait_ms",
                "must exceed the sum of the probe waits",
            ));
        }

        if self.telemetry.pos_decimals > 6 {
            return Err(SettingsError::invalid("telemetry.pos_decimals", "must be <= 6"));
        }
        if self.telemetry.poll_interval_ms == 0 || self.telemetry.queue_report_interval_ms == 0 {
            return Err(SettingsError::invalid("telemetry", "intervals must be > 0"));
        }

        Ok(())
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            other => Err(SettingsError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}
