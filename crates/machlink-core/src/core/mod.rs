//! Event plumbing shared by the session and the viewer gateway

pub mod event;

pub use event::{ActivePort, EventDispatcher, FirmwareInfo, MachineEvent};
