//! Data models shared across the machine link
//!
//! This module provides:
//! - Axis points with fixed decimal precision (positions and offsets)
//! - Firmware identification and feature sets
//! - Run state of the link and run-status notifications
//! - Transport kinds and port listings

pub mod firmware;
pub mod position;
pub mod state;

pub use firmware::{Feature, Firmware, FirmwareProfile};
pub use position::{AxisPoint, Precision};
pub use state::{PortEntry, RunState, RunStatus, TransportKind};
