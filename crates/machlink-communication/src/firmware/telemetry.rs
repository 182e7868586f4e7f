//! Telemetry parsing
//!
//! Classifies each framed line from a bound firmware and turns it into
//! canonical events. The first matching rule wins:
//!
//! 1. `ok` acknowledgments
//! 2. bracketed status reports (Grbl, Smoothie)
//! 3. RepRap `X:.. Y:.. Z:.. E:..` position replies
//! 4. telnet `WCS:` / `MCS:` composite reports
//! 5. TinyG JSON objects
//! 6. `ALARM`, `wait`, `Resend` and `error` lines
//! 7. anything else is forwarded as raw text
//!
//! Malformed input never fails; it falls through to rule 7.

use super::dialect::Dialect;
use super::grbl::error_decoder::parse_code;
use super::grbl::status_parser::{find_ignore_case, StatusReport};
use super::tinyg::{self, PositionUpdate, TinyGMessage};
use machlink_core::{AxisPoint, FirmwareError, MachineEvent, Precision};

/// What a line means to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Telemetry {
    /// Release one line of flow credit
    Ack,
    /// Answer to an `M114` position query
    PositionReply,
    /// The firmware raised an alarm
    Alarm,
    /// Decoded fault reported by the firmware
    Fault(FirmwareError),
    /// State word from a status report, e.g. `Idle` or `Hold`
    MachineState(String),
    /// Event to broadcast
    Event(MachineEvent),
}

/// Last reported values, used for change-only emission
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    precision: Precision,
    fourth_axis: bool,
    work: Option<AxisPoint>,
    offset: Option<AxisPoint>,
    machine: Option<AxisPoint>,
    feed_override: Option<f64>,
    rapid_override: Option<f64>,
    spindle_override: Option<f64>,
    real_feed: Option<f64>,
    real_spindle: Option<f64>,
}

impl PositionTracker {
    pub fn new(precision: Precision) -> Self {
        Self {
            precision,
            ..Default::default()
        }
    }

    pub fn work_position(&self) -> Option<AxisPoint> {
        self.work
    }

    pub fn work_offset(&self) -> Option<AxisPoint> {
        self.offset
    }

    pub fn machine_position(&self) -> Option<AxisPoint> {
        self.machine
    }

    /// True once any report carried a 4th axis
    pub fn has_fourth_axis(&self) -> bool {
        self.fourth_axis
    }

    /// Forget everything, keeping the precision
    pub fn reset(&mut self) {
        *self = Self::new(self.precision);
    }

    /// Round `point` and settle its 4th axis against what was seen before
    fn normalize(&mut self, point: AxisPoint, previous: Option<AxisPoint>) -> AxisPoint {
        let mut point = point.rounded(self.precision);
        if point.a.is_some() {
            self.fourth_axis = true;
        } else if self.fourth_axis {
            point.a = Some(previous.and_then(|p| p.a).unwrap_or(0.0));
        }
        point
    }

    pub fn update_work(&mut self, point: AxisPoint) -> Option<MachineEvent> {
        let point = self.normalize(point, self.work);
        if self.work == Some(point) {
            return None;
        }
        self.work = Some(point);
        Some(MachineEvent::WorkPosition(point))
    }

    pub fn update_offset(&mut self, point: AxisPoint) -> Option<MachineEvent> {
        let point = self.normalize(point, self.offset);
        if self.offset == Some(point) {
            return None;
        }
        self.offset = Some(point);
        Some(MachineEvent::WorkOffset(point))
    }

    pub fn update_machine(&mut self, point: AxisPoint) -> Option<MachineEvent> {
        let point = self.normalize(point, self.machine);
        if self.machine == Some(point) {
            return None;
        }
        self.machine = Some(point);
        Some(MachineEvent::MachinePosition(point))
    }

    /// Apply a partial update on top of the last work position
    pub fn merge_work(&mut self, update: PositionUpdate) -> Option<MachineEvent> {
        let base = self.work.unwrap_or_default();
        let mut point = AxisPoint::new(
            update.x.unwrap_or(base.x),
            update.y.unwrap_or(base.y),
            update.z.unwrap_or(base.z),
        );
        point.a = update.a.or(base.a);
        self.update_work(point)
    }

    fn scalar(
        slot: &mut Option<f64>,
        value: f64,
        event: fn(f64) -> MachineEvent,
    ) -> Option<MachineEvent> {
        if *slot == Some(value) {
            return None;
        }
        *slot = Some(value);
        Some(event(value))
    }
}

/// Line classifier for a bound firmware
#[derive(Debug, Clone, Default)]
pub struct TelemetryParser {
    tracker: PositionTracker,
}

impl TelemetryParser {
    pub fn new(precision: Precision) -> Self {
        Self {
            tracker: PositionTracker::new(precision),
        }
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
    }

    /// Classify one line
    pub fn parse(&mut self, line: &str, dialect: &dyn Dialect) -> Vec<Telemetry> {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return Vec::new();
        }

        if line.starts_with("ok") {
            return vec![Telemetry::Ack];
        }
        if line.starts_with('<') {
            return self.status_report(line);
        }
        if line.starts_with('X') {
            return self.reprap_position(line);
        }
        if line.contains("WCS:") || line.contains("MCS:") {
            return self.composite_report(line);
        }
        if line.starts_with('{') {
            if let Some(messages) = tinyg::response_parser::parse(line) {
                return self.tinyg(messages);
            }
        }
        if line.starts_with("ALARM") {
            let mut out = self.fault(line, dialect, "ALARM");
            out.push(Telemetry::Alarm);
            return out;
        }
        if line.starts_with("wait") {
            return Vec::new();
        }
        if line.starts_with("Resend") {
            tracing::warn!("Firmware asked to resend: {}", line);
            return Vec::new();
        }
        if line.starts_with("error") {
            return self.fault(line, dialect, "error");
        }

        vec![Telemetry::Event(MachineEvent::Data(line.to_string()))]
    }

    fn status_report(&mut self, line: &str) -> Vec<Telemetry> {
        let report = StatusReport::parse(line);
        let mut out = vec![Telemetry::Event(MachineEvent::Data(line.to_string()))];
        if let Some(state) = &report.state {
            out.push(Telemetry::MachineState(state.clone()));
        }

        let mut events = Vec::new();
        // an offset that was reported once stays valid for later MPos-only reports
        let last_offset = self.tracker.offset;
        if let Some(offset) = report.work_offset() {
            events.extend(self.tracker.update_offset(offset));
        }
        let known_offset = report.wco.or(last_offset);
        if let Some(work) = report.work_position(known_offset.as_ref()) {
            events.extend(self.tracker.update_work(work));
        }

        if let Some(ov) = report.overrides {
            let t = &mut self.tracker;
            if let Some(v) = ov.feed {
                events.extend(PositionTracker::scalar(
                    &mut t.feed_override,
                    v,
                    MachineEvent::FeedOverride,
                ));
            }
            if let Some(v) = ov.rapid {
                events.extend(PositionTracker::scalar(
                    &mut t.rapid_override,
                    v,
                    MachineEvent::RapidOverride,
                ));
            }
            if let Some(v) = ov.spindle {
                events.extend(PositionTracker::scalar(
                    &mut t.spindle_override,
                    v,
                    MachineEvent::SpindleOverride,
                ));
            }
        }
        if let Some(v) = report.feed {
            events.extend(PositionTracker::scalar(
                &mut self.tracker.real_feed,
                v,
                MachineEvent::RealFeed,
            ));
        }
        if let Some(v) = report.spindle {
            events.extend(PositionTracker::scalar(
                &mut self.tracker.real_spindle,
                v,
                MachineEvent::RealSpindle,
            ));
        }

        out.extend(events.into_iter().map(Telemetry::Event));
        out
    }

    fn reprap_position(&mut self, line: &str) -> Vec<Telemetry> {
        let mut out = Vec::new();
        if let (Some(x), Some(y), Some(z)) = (
            value_after(line, "x:"),
            value_after(line, "y:"),
            value_after(line, "z:"),
        ) {
            let mut point = AxisPoint::new(x, y, z);
            // the extruder doubles as the 4th axis
            point.a = value_after(line, "e:");
            if let Some(event) = self.tracker.update_work(point) {
                out.push(Telemetry::Event(event));
            }
        }
        out.push(Telemetry::PositionReply);
        out
    }

    fn composite_report(&mut self, line: &str) -> Vec<Telemetry> {
        let mut out = Vec::new();
        if let Some(point) = segment_point(line, "wcs:") {
            out.extend(self.tracker.update_work(point).map(Telemetry::Event));
        }
        if let Some(point) = segment_point(line, "mcs:") {
            out.extend(self.tracker.update_machine(point).map(Telemetry::Event));
        }
        out
    }

    fn tinyg(&mut self, messages: Vec<TinyGMessage>) -> Vec<Telemetry> {
        let mut out = Vec::new();
        for message in messages {
            match message {
                TinyGMessage::Ack => out.push(Telemetry::Ack),
                TinyGMessage::Fault { code, message } => {
                    out.push(Telemetry::Fault(FirmwareError::ProtocolError { code, message }));
                }
                TinyGMessage::Position(update) => {
                    out.extend(self.tracker.merge_work(update).map(Telemetry::Event));
                }
                TinyGMessage::State(name) => {
                    out.push(Telemetry::Event(MachineEvent::Data(format!("<{},>", name))));
                    out.push(Telemetry::MachineState(name.to_string()));
                }
                TinyGMessage::Firmware(build) => {
                    tracing::debug!("TinyG build {}", build);
                }
                TinyGMessage::Raw(text) => out.push(Telemetry::Event(MachineEvent::Data(text))),
            }
        }
        out
    }

    /// `error:N` / `ALARM:N`; decoded and acknowledged where the dialect
    /// counts faults as replies, forwarded raw elsewhere
    fn fault(
        &mut self,
        line: &str,
        dialect: &dyn Dialect,
        label: &str,
    ) -> Vec<Telemetry> {
        if !dialect.fault_releases_credit() {
            return vec![Telemetry::Event(MachineEvent::Data(line.to_string()))];
        }
        let fault = match parse_code(line) {
            Some(code) => Telemetry::Fault(decode(dialect, label, code)),
            None => Telemetry::Event(MachineEvent::Data(line.to_string())),
        };
        vec![Telemetry::Ack, fault]
    }
}

fn decode(dialect: &dyn Dialect, label: &str, code: u32) -> FirmwareError {
    if label == "ALARM" {
        let message = dialect.alarm_text(code).unwrap_or("Unknown alarm");
        FirmwareError::Alarm {
            code,
            message: message.to_string(),
        }
    } else {
        let message = dialect.error_text(code).unwrap_or("Unknown error");
        FirmwareError::ProtocolError {
            code,
            message: message.to_string(),
        }
    }
}

/// Number right after a case-insensitive `marker`
fn value_after(text: &str, marker: &str) -> Option<f64> {
    let start = find_ignore_case(text, marker)? + marker.len();
    text.get(start..)?
        .split_whitespace()
        .next()?
        .parse()
        .ok()
}

/// X/Y/Z following a `WCS:` / `MCS:` marker
fn segment_point(line: &str, marker: &str) -> Option<AxisPoint> {
    let start = find_ignore_case(line, marker)? + marker.len();
    let segment = line.get(start..)?;
    Some(AxisPoint::new(
        value_after(segment, "x:")?,
        value_after(segment, "y:")?,
        value_after(segment, "z:")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{GrblDialect, RepRapDialect, SmoothieDialect, TinyGDialect};

    fn events(out: &[Telemetry]) -> Vec<&MachineEvent> {
        out.iter()
            .filter_map(|t| match t {
                Telemetry::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_status_report_is_change_only() {
        let mut parser = TelemetryParser::new(Precision::new(3));
        let line = "<Idle|MPos:10.000,5.000,0.000|FS:0,0|WCO:2.000,1.000,0.000>";

        let first = parser.parse(line, &GrblDialect);
        assert!(events(&first).contains(&&MachineEvent::WorkPosition(AxisPoint::new(
            8.0, 4.0, 0.0
        ))));
        assert!(first.contains(&Telemetry::MachineState("Idle".to_string())));

        let second = parser.parse(line, &GrblDialect);
        assert_eq!(
            events(&second),
            vec![&MachineEvent::Data(line.to_string())]
        );
    }

    #[test]
    fn test_mpos_only_report_uses_last_offset() {
        let mut parser = TelemetryParser::new(Precision::new(3));
        parser.parse("<Idle|MPos:10.000,5.000,0.000|WCO:2.000,1.000,0.000>", &GrblDialect);
        let out = parser.parse("<Run|MPos:12.000,5.000,0.000|FS:300,0>", &GrblDialect);
        assert!(events(&out).contains(&&MachineEvent::WorkPosition(AxisPoint::new(
            10.0, 4.0, 0.0
        ))));
        assert!(events(&out).contains(&&MachineEvent::RealFeed(300.0)));
    }

    #[test]
    fn test_grbl_fault_acknowledges() {
        let mut parser = TelemetryParser::default();
        let out = parser.parse("error:20", &GrblDialect);
        assert_eq!(out[0], Telemetry::Ack);
        match &out[1] {
            Telemetry::Fault(err @ FirmwareError::ProtocolError { code: 20, .. }) => {
                assert!(err.to_string().starts_with("error: 20 - Unsupported"))
            }
            other => panic!("unexpected {:?}", other),
        }

        let out = parser.parse("ALARM:1", &GrblDialect);
        assert!(out.contains(&Telemetry::Alarm));
        assert!(out.iter().any(|t| matches!(
            t,
            Telemetry::Fault(FirmwareError::Alarm { code: 1, .. })
        )));
    }

    #[test]
    fn test_other_faults_forwarded_raw() {
        let mut parser = TelemetryParser::default();
        let out = parser.parse("error:Unsupported command", &SmoothieDialect);
        assert_eq!(
            out,
            vec![Telemetry::Event(MachineEvent::Data(
                "error:Unsupported command".to_string()
            ))]
        );
    }

    #[test]
    fn test_reprap_position_reply() {
        let mut parser = TelemetryParser::new(Precision::new(2));
        let out = parser.parse(
            "X:10.123 Y:0.00 Z:1.50 E:2.00 Count X: 10.12 Y:0.00 Z:1.50",
            &RepRapDialect::marlin(),
        );
        assert_eq!(
            out,
            vec![
                Telemetry::Event(MachineEvent::WorkPosition(
                    AxisPoint::new(10.12, 0.0, 1.5).with_a(2.0)
                )),
                Telemetry::PositionReply,
            ]
        );
    }

    #[test]
    fn test_fourth_axis_kept_once_seen() {
        let mut tracker = PositionTracker::new(Precision::default());
        tracker.update_work(AxisPoint::new(0.0, 0.0, 0.0).with_a(45.0));
        let event = tracker.update_work(AxisPoint::new(1.0, 0.0, 0.0));
        assert_eq!(
            event,
            Some(MachineEvent::WorkPosition(
                AxisPoint::new(1.0, 0.0, 0.0).with_a(45.0)
            ))
        );
    }

    #[test]
    fn test_telnet_composite_report() {
        let mut parser = TelemetryParser::new(Precision::new(4));
        let out = parser.parse(
            "last C: X:0.0000 Y:-0.0000 Z:0.0000 realtime WCS: X:1.0000 Y:0.0045 Z:0.0000 MCS: X:44.2000 Y:76.5125 Z:0.0000",
            &SmoothieDialect,
        );
        assert_eq!(
            events(&out),
            vec![
                &MachineEvent::WorkPosition(AxisPoint::new(1.0, 0.0045, 0.0)),
                &MachineEvent::MachinePosition(AxisPoint::new(44.2, 76.5125, 0.0)),
            ]
        );
    }

    #[test]
    fn test_tinyg_status_and_ack() {
        let mut parser = TelemetryParser::default();
        let out = parser.parse(r#"{"sr":{"posx":5,"stat":6}}"#, &TinyGDialect);
        assert!(events(&out).contains(&&MachineEvent::Data("<Hold,>".to_string())));
        assert!(events(&out).contains(&&MachineEvent::WorkPosition(AxisPoint::new(
            5.0, 0.0, 0.0
        ))));

        let out = parser.parse(r#"{"r":{},"f":[1,0,4]}"#, &TinyGDialect);
        assert_eq!(out, vec![Telemetry::Ack]);
        let out = parser.parse(r#"{"r":{"n":7},"f":[1,202,9]}"#, &TinyGDialect);
        assert!(matches!(
            out.as_slice(),
            [Telemetry::Fault(FirmwareError::ProtocolError { code: 202, .. }), Telemetry::Ack]
        ));
        assert_eq!(parser.parse("ok", &TinyGDialect), vec![Telemetry::Ack]);
    }

    #[test]
    fn test_wait_and_resend_consumed() {
        let mut parser = TelemetryParser::default();
        let marlin = RepRapDialect::marlin();
        assert!(parser.parse("wait", &marlin).is_empty());
        assert!(parser.parse("Resend: 12", &marlin).is_empty());
        assert!(parser.parse("   ", &marlin).is_empty());
    }
}
