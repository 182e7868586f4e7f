//! Canonical events published to viewers
//!
//! Provides:
//! - The dialect-independent event vocabulary
//! - A broadcast dispatcher fanning events out to every attached viewer

use crate::data::{AxisPoint, Feature, FirmwareProfile, PortEntry, RunStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Firmware identification as announced to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// Firmware tag, e.g. `grbl`
    pub firmware: String,
    /// Reported version
    pub version: String,
    /// Build date if the firmware reports one
    pub date: Option<String>,
}

impl From<&FirmwareProfile> for FirmwareInfo {
    fn from(profile: &FirmwareProfile) -> Self {
        Self {
            firmware: profile.firmware.tag().to_string(),
            version: profile.version.clone(),
            date: profile.date.clone(),
        }
    }
}

/// Serial port currently in use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivePort {
    /// Device path
    pub port: String,
    /// Baud rate
    pub baudrate: u32,
}

/// Canonical machine event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum MachineEvent {
    /// Connection lifecycle, e.g. `opening:/dev/ttyUSB0` or `Connect`
    #[serde(rename = "connectStatus")]
    ConnectStatus(String),
    /// Identified firmware
    #[serde(rename = "firmware")]
    Firmware(FirmwareInfo),
    /// Features offered by the bound dialect
    #[serde(rename = "featureList")]
    FeatureList(Vec<Feature>),
    /// Available transport kinds
    #[serde(rename = "interfaces")]
    Interfaces(Vec<String>),
    /// Serial ports found on the host
    #[serde(rename = "ports")]
    Ports(Vec<PortEntry>),
    /// Serial port in use
    #[serde(rename = "activePort")]
    ActivePort(ActivePort),
    /// Host in use for telnet / esp links
    #[serde(rename = "activeIP")]
    ActiveIp(String),
    /// Working position
    #[serde(rename = "wPos")]
    WorkPosition(AxisPoint),
    /// Work coordinate offset
    #[serde(rename = "wOffset")]
    WorkOffset(AxisPoint),
    /// Machine position, telnet composite reports only
    #[serde(rename = "mPos")]
    MachinePosition(AxisPoint),
    #[serde(rename = "feedOverride")]
    FeedOverride(f64),
    #[serde(rename = "rapidOverride")]
    RapidOverride(f64),
    #[serde(rename = "spindleOverride")]
    SpindleOverride(f64),
    #[serde(rename = "realFeed")]
    RealFeed(f64),
    #[serde(rename = "realSpindle")]
    RealSpindle(f64),
    /// Source text of the job being streamed
    #[serde(rename = "runningJob")]
    RunningJob(String),
    #[serde(rename = "runStatus")]
    RunStatus(RunStatus),
    /// Lines still waiting in the queue
    #[serde(rename = "qCount")]
    QueueCount(usize),
    /// Raw diagnostic text from the machine
    #[serde(rename = "data")]
    Data(String),
    /// Laser test power, 0 when off
    #[serde(rename = "laserTest")]
    LaserTest(f64),
    /// Failure surfaced to every viewer
    #[serde(rename = "error")]
    Error(String),
}

impl MachineEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            MachineEvent::ConnectStatus(_) => "connectStatus",
            MachineEvent::Firmware(_) => "firmware",
            MachineEvent::FeatureList(_) => "featureList",
            MachineEvent::Interfaces(_) => "interfaces",
            MachineEvent::Ports(_) => "ports",
            MachineEvent::ActivePort(_) => "activePort",
            MachineEvent::ActiveIp(_) => "activeIP",
            MachineEvent::WorkPosition(_) => "wPos",
            MachineEvent::WorkOffset(_) => "wOffset",
            MachineEvent::MachinePosition(_) => "mPos",
            MachineEvent::FeedOverride(_) => "feedOverride",
            MachineEvent::RapidOverride(_) => "rapidOverride",
            MachineEvent::SpindleOverride(_) => "spindleOverride",
            MachineEvent::RealFeed(_) => "realFeed",
            MachineEvent::RealSpindle(_) => "realSpindle",
            MachineEvent::RunningJob(_) => "runningJob",
            MachineEvent::RunStatus(_) => "runStatus",
            MachineEvent::QueueCount(_) => "qCount",
            MachineEvent::Data(_) => "data",
            MachineEvent::LaserTest(_) => "laserTest",
            MachineEvent::Error(_) => "error",
        }
    }
}

impl std::fmt::Display for MachineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MachineEvent::ConnectStatus(status) => write!(f, "connectStatus {}", status),
            MachineEvent::Firmware(info) => {
                write!(f, "firmware {} {}", info.firmware, info.version)
            }
            MachineEvent::WorkPosition(p) => write!(f, "wPos {}", p),
            MachineEvent::WorkOffset(p) => write!(f, "wOffset {}", p),
            MachineEvent::MachinePosition(p) => write!(f, "mPos {}", p),
            MachineEvent::RunStatus(status) => write!(f, "runStatus {:?}", status),
            MachineEvent::QueueCount(n) => write!(f, "qCount {}", n),
            MachineEvent::Data(line) => write!(f, "data {}", line),
            MachineEvent::Error(msg) => write!(f, "error {}", msg),
            other => f.write_str(other.name()),
        }
    }
}

/// Event dispatcher for publishing events to subscribers
#[derive(Clone)]
pub struct EventDispatcher {
    /// Broadcast sender channel for machine events.
    tx: broadcast::Sender<MachineEvent>,
}

impl EventDispatcher {
    /// Create a new event dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer; slow viewers lag past it
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<MachineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: MachineEvent) -> usize {
        tracing::trace!("publish {}", event);
        self.tx.send(event).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(MachineEvent::QueueCount(0)).unwrap();
        assert_eq!(json, serde_json::json!({"event": "qCount", "data": 0}));

        let json = serde_json::to_value(MachineEvent::RunStatus(RunStatus::Finished)).unwrap();
        assert_eq!(json, serde_json::json!({"event": "runStatus", "data": "finished"}));
    }

    #[test]
    fn test_name_matches_serde_tag() {
        let events = vec![
            MachineEvent::ActiveIp("10.0.0.2".into()),
            MachineEvent::WorkOffset(AxisPoint::default()),
            MachineEvent::LaserTest(0.0),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event"], event.name());
        }
    }

    #[tokio::test]
    async fn test_dispatcher_fan_out() {
        let dispatcher = EventDispatcher::new(8);
        assert_eq!(dispatcher.publish(MachineEvent::Data("x".into())), 0);

        let mut a = dispatcher.subscribe();
        let mut b = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 2);
        assert_eq!(dispatcher.publish(MachineEvent::QueueCount(3)), 2);
        assert_eq!(a.recv().await.unwrap(), MachineEvent::QueueCount(3));
        assert_eq!(b.recv().await.unwrap(), MachineEvent::QueueCount(3));
    }
}
