//! Last-known state replayed to viewers that attach late

use machlink_core::{
    ActivePort, AxisPoint, Feature, FirmwareInfo, MachineEvent, RunState, RunStatus, TransportKind,
};

/// Values a newly attached viewer needs before the next live event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub connect_status: Option<String>,
    pub active_port: Option<ActivePort>,
    pub active_ip: Option<String>,
    pub firmware: Option<FirmwareInfo>,
    pub features: Vec<Feature>,
    pub work_position: Option<AxisPoint>,
    pub work_offset: Option<AxisPoint>,
    pub machine_position: Option<AxisPoint>,
    pub feed_override: Option<f64>,
    pub spindle_override: Option<f64>,
    pub running_job: Option<String>,
    pub run_state: RunState,
}

impl Snapshot {
    /// Fold a published event into the snapshot
    pub fn record(&mut self, event: &MachineEvent) {
        match event {
            MachineEvent::ConnectStatus(status) => {
                if status == "Connect" || status.starts_with("closed:") {
                    self.clear_link();
                }
                self.connect_status = Some(status.clone());
            }
            MachineEvent::ActivePort(port) => {
                self.active_port = Some(port.clone());
                self.active_ip = None;
            }
            MachineEvent::ActiveIp(ip) => {
                self.active_ip = Some(ip.clone());
                self.active_port = None;
            }
            MachineEvent::Firmware(info) => self.firmware = Some(info.clone()),
            MachineEvent::FeatureList(features) => self.features = features.clone(),
            MachineEvent::WorkPosition(p) => self.work_position = Some(*p),
            MachineEvent::WorkOffset(p) => self.work_offset = Some(*p),
            MachineEvent::MachinePosition(p) => self.machine_position = Some(*p),
            MachineEvent::FeedOverride(v) => self.feed_override = Some(*v),
            MachineEvent::SpindleOverride(v) => self.spindle_override = Some(*v),
            MachineEvent::RunningJob(source) => self.running_job = Some(source.clone()),
            MachineEvent::RunStatus(RunStatus::Finished | RunStatus::Stopped) => {
                self.running_job = None;
            }
            _ => {}
        }
    }

    /// Drop everything tied to the closed link, including its port or address
    fn clear_link(&mut self) {
        *self = Snapshot {
            connect_status: self.connect_status.take(),
            ..Snapshot::default()
        };
    }

    /// Events that bring a fresh viewer up to date
    pub fn events(&self) -> Vec<MachineEvent> {
        let mut events = vec![MachineEvent::Interfaces(
            TransportKind::INTERFACES.iter().map(|s| s.to_string()).collect(),
        )];
        if let Some(status) = &self.connect_status {
            events.push(MachineEvent::ConnectStatus(status.clone()));
        }
        if let Some(port) = &self.active_port {
            events.push(MachineEvent::ActivePort(port.clone()));
        }
        if let Some(ip) = &self.active_ip {
            events.push(MachineEvent::ActiveIp(ip.clone()));
        }
        if let Some(info) = &self.firmware {
            events.push(MachineEvent::Firmware(info.clone()));
            events.push(MachineEvent::FeatureList(self.features.clone()));
        }
        if let Some(p) = self.work_position {
            events.push(MachineEvent::WorkPosition(p));
        }
        if let Some(p) = self.work_offset {
            events.push(MachineEvent::WorkOffset(p));
        }
        if let Some(p) = self.machine_position {
            events.push(MachineEvent::MachinePosition(p));
        }
        if let Some(v) = self.feed_override {
            events.push(MachineEvent::FeedOverride(v));
        }
        if let Some(v) = self.spindle_override {
            events.push(MachineEvent::SpindleOverride(v));
        }
        if let Some(source) = &self.running_job {
            events.push(MachineEvent::RunningJob(source.clone()));
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_replays_known_state() {
        let mut snapshot = Snapshot::default();
        snapshot.record(&MachineEvent::ActivePort(ActivePort {
            port: "/dev/ttyUSB0".into(),
            baudrate: 115200,
        }));
        snapshot.record(&MachineEvent::ConnectStatus("opened:/dev/ttyUSB0".into()));
        snapshot.record(&MachineEvent::WorkPosition(AxisPoint::new(1.0, 2.0, 3.0)));
        snapshot.record(&MachineEvent::RunningJob("G1 X1".into()));

        let events = snapshot.events();
        assert!(matches!(events[0], MachineEvent::Interfaces(_)));
        assert_eq!(
            events[1],
            MachineEvent::ConnectStatus("opened:/dev/ttyUSB0".into())
        );
        assert_eq!(
            events[2],
            MachineEvent::ActivePort(ActivePort {
                port: "/dev/ttyUSB0".into(),
                baudrate: 115200,
            })
        );
        assert!(events.contains(&MachineEvent::RunningJob("G1 X1".into())));
        assert!(!events.iter().any(|e| matches!(e, MachineEvent::ActiveIp(_))));
    }

    #[test]
    fn test_network_link_replaces_port() {
        let mut snapshot = Snapshot::default();
        snapshot.record(&MachineEvent::ActivePort(ActivePort {
            port: "/dev/ttyUSB0".into(),
            baudrate: 115200,
        }));
        snapshot.record(&MachineEvent::ConnectStatus("Connect".into()));
        snapshot.record(&MachineEvent::ActiveIp("192.168.1.20".into()));
        snapshot.record(&MachineEvent::ConnectStatus("opened:192.168.1.20".into()));

        let events = snapshot.events();
        assert_eq!(events[2], MachineEvent::ActiveIp("192.168.1.20".into()));
        assert!(!events.iter().any(|e| matches!(e, MachineEvent::ActivePort(_))));
    }

    #[test]
    fn test_finished_job_leaves_snapshot() {
        let mut snapshot = Snapshot::default();
        snapshot.record(&MachineEvent::RunningJob("G1 X1".into()));
        snapshot.record(&MachineEvent::RunStatus(RunStatus::Finished));
        assert!(snapshot.running_job.is_none());
    }

    #[test]
    fn test_disconnect_clears_link_state() {
        let mut snapshot = Snapshot::default();
        snapshot.record(&MachineEvent::ActiveIp("192.168.1.20".into()));
        snapshot.record(&MachineEvent::WorkOffset(AxisPoint::new(1.0, 0.0, 0.0)));
        snapshot.record(&MachineEvent::ConnectStatus("closed:/dev/ttyUSB0".into()));
        snapshot.record(&MachineEvent::ConnectStatus("Connect".into()));
        assert_eq!(snapshot.work_offset, None);
        assert_eq!(snapshot.active_ip, None);
        assert!(!snapshot
            .events()
            .iter()
            .any(|e| matches!(e, MachineEvent::ActiveIp(_))));
        assert_eq!(snapshot.connect_status.as_deref(), Some("Connect"));
    }
}
