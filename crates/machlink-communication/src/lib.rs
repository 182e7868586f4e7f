//! # Machlink Communication
//!
//! The machine side of the gateway: serial, telnet and ESP WebSocket
//! transports, firmware detection, per-firmware dialects, flow-controlled
//! queueing, telemetry parsing and the session that ties them together.

pub mod communication;
pub mod firmware;
pub mod session;

pub use communication::{
    open_link, serial::list_ports, Communicator, ConnectionParams, FlowCredit, FlowLimits,
    FlowQueue, LineFramer, Link, TransportEvent,
};

pub use firmware::{
    dialect_for, AxisSelector, ClearMethod, Coordinates, Dialect, FirmwareDetector, JogStep,
    JogTarget, MotionCommand, ProbeRequest, SdOperation, TelemetryParser,
};

pub use session::{
    spawn_session, Action, JobHooks, LaserRequest, NoHooks, Session, SessionConfig,
    SessionHandle, Snapshot,
};
