//! # Machlink
//!
//! A protocol gateway that lets a web control panel drive CNC and 3D-printer
//! style controllers:
//! - Grbl, Smoothieware, TinyG, Marlin, MarlinKimbra, Repetier, RepRapFirmware
//! - USB serial, telnet and ESP8266 WebSocket links
//!
//! ## Architecture
//!
//! Machlink is organized as a workspace with multiple crates:
//!
//! 1. **machlink-core** - Error taxonomy, canonical events, position and run-state model
//! 2. **machlink-communication** - Transports, firmware detection, dialects, flow control,
//!    telemetry and the session actor
//! 3. **machlink-settings** - Configuration loading and validation
//! 4. **machlink** - This binary: viewer gateway, job hooks and logging setup

pub mod gateway;
pub mod hooks;

pub use gateway::{Gateway, ViewerRequest};
pub use hooks::ShellHooks;

use machlink_communication::firmware::DetectorConfig;
use machlink_communication::{FlowLimits, SessionConfig};
use machlink_core::Precision;
use machlink_settings::Config;
use std::time::Duration;

/// Build timestamp injected by `build.rs`
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize tracing
///
/// `RUST_LOG` wins over `level` when it is set.
pub fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

/// Session tunables from the loaded configuration
pub fn session_config(config: &Config) -> SessionConfig {
    let detection = &config.detection;
    let firmware_wait = (detection.firmware_wait_ms > 0)
        .then(|| Duration::from_millis(detection.firmware_wait_ms));

    SessionConfig {
        detector: DetectorConfig {
            reset_on_connect: detection.reset_on_connect,
            grbl_wait: Duration::from_millis(detection.grbl_wait_ms),
            smoothie_wait: Duration::from_millis(detection.smoothie_wait_ms),
            tinyg_wait: Duration::from_millis(detection.tinyg_wait_ms),
            firmware_wait,
        },
        limits: FlowLimits {
            grbl_buffer_size: config.flow.grbl_buffer_size,
            tinyg_credit: config.flow.tinyg_buffer_size,
            reprap_credit: config.flow.reprap_buffer_size,
            reprapfirmware_credit: config.flow.reprapfirmware_buffer_size,
        },
        precision: Precision::new(config.telemetry.pos_decimals),
        poll_interval: Duration::from_millis(config.telemetry.poll_interval_ms),
        queue_report_interval: Duration::from_millis(config.telemetry.queue_report_interval_ms),
        connect_timeout: Duration::from_millis(config.connection.timeout_ms),
        optimize_gcode: config.job.optimize_gcode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_from_defaults() {
        let session = session_config(&Config::default());
        assert_eq!(session.limits, FlowLimits::default());
        assert_eq!(session.detector, DetectorConfig::default());
        assert_eq!(session.poll_interval, Duration::from_millis(250));
        assert!(!session.optimize_gcode);
    }

    #[test]
    fn test_zero_firmware_wait_disables_deadline() {
        let mut config = Config::default();
        config.detection.firmware_wait_ms = 0;
        assert_eq!(session_config(&config).detector.firmware_wait, None);
    }
}
