//! Machlink Settings Crate
//!
//! Loads, validates and saves the gateway configuration.

pub mod config;
pub mod error;

pub use config::{
    Config, ConnectionSettings, DetectionSettings, FlowSettings, JobSettings, LoggingSettings,
    ServerSettings, TelemetrySettings,
};
pub use error::{SettingsError, SettingsResult};
