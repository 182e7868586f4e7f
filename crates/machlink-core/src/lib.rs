//! # Machlink Core
//!
//! Core types for the machlink gateway: the error taxonomy, the canonical
//! event vocabulary broadcast to viewers, and the position / firmware /
//! run-state data model.

pub mod core;
pub mod data;
pub mod error;

pub use core::{ActivePort, EventDispatcher, FirmwareInfo, MachineEvent};

pub use data::{
    AxisPoint, Feature, Firmware, FirmwareProfile, PortEntry, Precision, RunState, RunStatus,
    TransportKind,
};

pub use error::{ConnectionError, ControllerError, Error, FirmwareError, Result};
