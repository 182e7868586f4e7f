//! RepRap family dialects
//!
//! Marlin, MarlinKimbra, Repetier and RepRapFirmware share line-counting
//! flow control and `M114` position polling. They differ in how they home,
//! zero, probe and fire a laser, and in which SD card commands they take.

use crate::communication::{FlowCredit, FlowLimits};
use crate::firmware::dialect::{
    distance_mode, g0_jog, g0_jog_to, g10_zero, g92_zero, goto_zero, num, require_jog,
    require_target, set_position, step_override, target_words, AxisSelector, ControlAction,
    Dialect, LaserPlan, MotionCommand, Outbound, OverrideChange, SdOperation, StatusPoll,
};
use machlink_core::{Feature, Firmware, FirmwareProfile, Result};
use std::collections::BTreeSet;

const FEED_RANGE: (u32, u32) = (10, 200);
const SPINDLE_RANGE: (u32, u32) = (0, 200);

/// One of the four printer-style firmwares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepRapDialect {
    firmware: Firmware,
}

impl RepRapDialect {
    pub fn marlin() -> Self {
        Self {
            firmware: Firmware::Marlin,
        }
    }

    pub fn marlin_kimbra() -> Self {
        Self {
            firmware: Firmware::MarlinKimbra,
        }
    }

    pub fn repetier() -> Self {
        Self {
            firmware: Firmware::Repetier,
        }
    }

    pub fn reprapfirmware() -> Self {
        Self {
            firmware: Firmware::RepRapFirmware,
        }
    }

    /// Marlin and RepRapFirmware home with `G28` and zero with `G92`
    fn is_printer_native(&self) -> bool {
        matches!(self.firmware, Firmware::Marlin | Firmware::RepRapFirmware)
    }

    fn jog(&self, command: &MotionCommand) -> Result<Vec<String>> {
        match (self.firmware, command) {
            (Firmware::Marlin, MotionCommand::Jog(step)) => {
                let feed = require_jog(step)?;
                Ok(vec![
                    "G91".to_string(),
                    format!("G0 F{} {}{}", feed, step.dir, num(step.dist)),
                    "G90".to_string(),
                ])
            }
            (Firmware::RepRapFirmware, MotionCommand::Jog(step)) => {
                let feed = require_jog(step)?;
                Ok(vec![
                    "M120".to_string(),
                    "G91".to_string(),
                    format!("G1 {}{} F{}", step.dir, num(step.dist), feed),
                    "M121".to_string(),
                ])
            }
            (Firmware::RepRapFirmware, MotionCommand::JogTo(target)) => {
                require_target(target)?;
                Ok(vec![
                    "M120".to_string(),
                    distance_mode(target).to_string(),
                    format!("G1 {}", target_words(target).join(" ")),
                    "G90".to_string(),
                    "M121".to_string(),
                ])
            }
            (_, MotionCommand::Jog(step)) => g0_jog(step),
            (_, MotionCommand::JogTo(target)) => g0_jog_to(target),
            _ => Err(self.not_supported(command.name())),
        }
    }

    fn set_zero(&self, axis: AxisSelector) -> String {
        match (self.firmware, axis) {
            _ if self.is_printer_native() => g92_zero(axis),
            (Firmware::Repetier, AxisSelector::All) => "G92".to_string(),
            (Firmware::MarlinKimbra, AxisSelector::All) => "G92 X0 Y0 Z0".to_string(),
            _ => g10_zero(axis),
        }
    }

    fn home(&self, axis: AxisSelector) -> Result<String> {
        let cmd = if self.is_printer_native() { "G28" } else { "G28.2" };
        let line = match axis {
            AxisSelector::A if self.firmware == Firmware::RepRapFirmware => {
                return Err(self.not_supported("home a"))
            }
            AxisSelector::A => format!("{} E1", cmd),
            AxisSelector::All => format!("{} X Y Z", cmd),
            AxisSelector::Xyza => format!("{} X Y Z E", cmd),
            linear => format!("{} {}", cmd, linear.letter().unwrap_or("X")),
        };
        Ok(line)
    }

    fn probe(&self, command: &MotionCommand) -> Result<Vec<String>> {
        let MotionCommand::Probe(probe) = command else {
            return Err(self.not_supported(command.name()));
        };
        let axis = probe.direction.to_uppercase();
        match self.firmware {
            Firmware::Repetier | Firmware::MarlinKimbra => {
                Ok(vec![format!("G38.2 {}-5 F1", axis)])
            }
            Firmware::RepRapFirmware if axis == "Z" => Ok(vec!["G30".to_string()]),
            _ => Err(self.not_supported(&format!("probe {}", probe.direction))),
        }
    }

    fn credited_override(&self, code: &str, value: u32) -> OverrideChange {
        OverrideChange {
            output: vec![Outbound::Credited(format!("{} S{}", code, value))],
            value: Some(value),
        }
    }
}

impl Dialect for RepRapDialect {
    fn firmware(&self) -> Firmware {
        self.firmware
    }

    fn features(&self) -> BTreeSet<Feature> {
        let mut features: BTreeSet<Feature> = [Feature::Jog, Feature::Home, Feature::LaserTest]
            .into_iter()
            .collect();
        if self.firmware != Firmware::Marlin {
            features.extend([
                Feature::Probe,
                Feature::FeedOverride,
                Feature::SpindleOverride,
            ]);
        }
        features.insert(Feature::SdCard);
        features
    }

    fn flow_credit(&self, limits: &FlowLimits, pending: u32) -> FlowCredit {
        let max = match self.firmware {
            Firmware::RepRapFirmware => limits.reprapfirmware_credit,
            _ => limits.reprap_credit,
        };
        FlowCredit::lines_with_pending(max, pending)
    }

    fn status_poll(&self) -> StatusPoll {
        StatusPoll::PositionQuery
    }

    fn translate(&self, command: &MotionCommand) -> Result<Vec<String>> {
        match command {
            MotionCommand::Jog(_) | MotionCommand::JogTo(_) => self.jog(command),
            MotionCommand::SetZero(axis) => Ok(vec![self.set_zero(*axis)]),
            MotionCommand::GotoZero(axis) => Ok(vec![goto_zero(*axis)]),
            MotionCommand::SetPosition(coords) => Ok(vec![set_position(coords)?]),
            MotionCommand::Home(axis) => Ok(vec![self.home(*axis)?]),
            MotionCommand::Probe(_) => self.probe(command),
        }
    }

    fn control(&self, action: ControlAction, _profile: &FirmwareProfile) -> Vec<Outbound> {
        match (action, self.firmware) {
            (ControlAction::Pause, Firmware::RepRapFirmware) => vec![Outbound::line("M25")],
            (ControlAction::Resume, Firmware::RepRapFirmware) => vec![Outbound::line("M24")],
            // the printer firmwares have no hold; the gateway just stops feeding lines
            (ControlAction::Pause | ControlAction::Resume, _) => Vec::new(),
            (ControlAction::Stop | ControlAction::ClearAlarm(_) | ControlAction::ResetMachine, _) => {
                vec![Outbound::line("M112")]
            }
        }
    }

    fn feed_override(&self, adjust: i32, current: u32) -> OverrideChange {
        if self.firmware == Firmware::Marlin {
            return OverrideChange::default();
        }
        let value = step_override(current, adjust, FEED_RANGE.0, FEED_RANGE.1);
        self.credited_override("M220", value)
    }

    fn spindle_override(&self, adjust: i32, current: u32) -> OverrideChange {
        if self.firmware == Firmware::Marlin {
            return OverrideChange::default();
        }
        let value = step_override(current, adjust, SPINDLE_RANGE.0, SPINDLE_RANGE.1);
        self.credited_override("M221", value)
    }

    fn laser_on(
        &self,
        _power: f64,
        s_value: i64,
        duration_ms: u64,
        _profile: &FirmwareProfile,
    ) -> LaserPlan {
        let before = match self.firmware {
            Firmware::Marlin | Firmware::RepRapFirmware => {
                vec!["G1 F1".to_string(), format!("M106 S{}", s_value)]
            }
            _ => vec![
                "G1F1".to_string(),
                format!("M3 S{}", s_value),
                "M4".to_string(),
            ],
        };
        let mut after = Vec::new();
        if duration_ms > 0 {
            after.push(format!("G4 P{}", duration_ms));
            after.extend(self.laser_off());
        }
        LaserPlan { before, after }
    }

    fn laser_off(&self) -> Vec<String> {
        match self.firmware {
            Firmware::Marlin => vec!["M107".to_string()],
            Firmware::RepRapFirmware => vec!["M106 S0".to_string()],
            _ => vec!["M5".to_string()],
        }
    }

    fn sd_command(&self, op: &SdOperation) -> Result<Vec<String>> {
        if self.firmware == Firmware::Repetier {
            return match op {
                SdOperation::Rm(file) => Ok(vec![format!("M30 {}", file)]),
                other => Err(self.not_supported(other.name())),
            };
        }
        let lines = match op {
            SdOperation::List if self.firmware == Firmware::RepRapFirmware => {
                vec!["M20 S2".to_string()]
            }
            SdOperation::List => vec!["M20".to_string()],
            SdOperation::Rm(file) => vec![format!("M30 {}", file)],
            SdOperation::Play(file) => vec![format!("M23 {}", file), "M24".to_string()],
            SdOperation::Pause => vec!["M25".to_string()],
            SdOperation::Resume => vec!["M24".to_string()],
            SdOperation::Abort => vec!["M112".to_string()],
            SdOperation::Upload { filename, gcode } => {
                let mut lines = vec![format!("M28 {}", filename)];
                lines.extend(gcode.lines().map(str::to_string));
                lines.push(format!("M29 {}", filename));
                lines
            }
            SdOperation::Progress => vec!["M27".to_string()],
            SdOperation::Cd(_) | SdOperation::Mv { .. } => {
                return Err(self.not_supported(op.name()))
            }
        };
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::dialect::{Coordinates, JogStep, JogTarget, ProbeRequest};

    fn jog_x() -> MotionCommand {
        MotionCommand::Jog(JogStep {
            dir: "X".to_string(),
            dist: 10.0,
            feed: 1200.0,
        })
    }

    #[test]
    fn test_jog_forms() {
        assert_eq!(
            RepRapDialect::marlin().translate(&jog_x()).unwrap(),
            vec!["G91", "G0 F1200 X10", "G90"]
        );
        assert_eq!(
            RepRapDialect::repetier().translate(&jog_x()).unwrap(),
            vec!["G91", "G0 F1200X10", "G90"]
        );
        assert_eq!(
            RepRapDialect::reprapfirmware().translate(&jog_x()).unwrap(),
            vec!["M120", "G91", "G1 X10 F1200", "M121"]
        );
    }

    #[test]
    fn test_reprapfirmware_jog_to_saves_state() {
        let target = MotionCommand::JogTo(JogTarget {
            target: Coordinates {
                z: Some(5.0),
                ..Default::default()
            },
            mode: 0,
            feed: Some(300.0),
        });
        assert_eq!(
            RepRapDialect::reprapfirmware().translate(&target).unwrap(),
            vec!["M120", "G90", "G1 F300 Z5", "G90", "M121"]
        );
    }

    #[test]
    fn test_set_zero_all() {
        let zero = |d: RepRapDialect| d.translate(&MotionCommand::SetZero(AxisSelector::All));
        assert_eq!(zero(RepRapDialect::repetier()).unwrap(), vec!["G92"]);
        assert_eq!(zero(RepRapDialect::marlin_kimbra()).unwrap(), vec!["G92 X0 Y0 Z0"]);
        assert_eq!(zero(RepRapDialect::marlin()).unwrap(), vec!["G92 X0 Y0 Z0"]);
        assert_eq!(
            RepRapDialect::repetier()
                .translate(&MotionCommand::SetZero(AxisSelector::X))
                .unwrap(),
            vec!["G10 L20 P0 X0"]
        );
    }

    #[test]
    fn test_home_forms() {
        let home = |d: RepRapDialect, axis| d.translate(&MotionCommand::Home(axis));
        assert_eq!(home(RepRapDialect::marlin(), AxisSelector::A).unwrap(), vec!["G28 E1"]);
        assert_eq!(
            home(RepRapDialect::marlin_kimbra(), AxisSelector::Xyza).unwrap(),
            vec!["G28.2 X Y Z E"]
        );
        assert!(home(RepRapDialect::reprapfirmware(), AxisSelector::A).is_err());
    }

    #[test]
    fn test_probe_support() {
        let probe = |direction: &str| {
            MotionCommand::Probe(ProbeRequest {
                direction: direction.to_string(),
                offset: 2.0,
            })
        };
        assert_eq!(
            RepRapDialect::reprapfirmware().translate(&probe("z")).unwrap(),
            vec!["G30"]
        );
        assert!(RepRapDialect::reprapfirmware().translate(&probe("x")).is_err());
        assert!(RepRapDialect::marlin().translate(&probe("z")).is_err());
        assert_eq!(
            RepRapDialect::repetier().translate(&probe("z")).unwrap(),
            vec!["G38.2 Z-5 F1"]
        );
    }

    #[test]
    fn test_pause_only_on_reprapfirmware() {
        let profile = FirmwareProfile::new(Firmware::Marlin, "1.1.9");
        assert!(RepRapDialect::marlin()
            .control(ControlAction::Pause, &profile)
            .is_empty());
        assert_eq!(
            RepRapDialect::reprapfirmware().control(ControlAction::Resume, &profile),
            vec![Outbound::line("M24")]
        );
        assert_eq!(
            RepRapDialect::repetier().control(ControlAction::Stop, &profile),
            vec![Outbound::line("M112")]
        );
    }

    #[test]
    fn test_overrides_take_line_credit() {
        let change = RepRapDialect::marlin_kimbra().feed_override(10, 100);
        assert_eq!(change.output, vec![Outbound::Credited("M220 S110".to_string())]);
        assert_eq!(change.value, Some(110));
        assert!(RepRapDialect::marlin().spindle_override(10, 100).output.is_empty());
    }

    #[test]
    fn test_laser_plans() {
        let profile = FirmwareProfile::new(Firmware::Marlin, "1.1.9");
        let plan = RepRapDialect::marlin().laser_on(10.0, 25, 500, &profile);
        assert_eq!(plan.before, vec!["G1 F1", "M106 S25"]);
        assert_eq!(plan.after, vec!["G4 P500", "M107"]);

        let plan = RepRapDialect::repetier().laser_on(10.0, 25, 0, &profile);
        assert_eq!(plan.before, vec!["G1F1", "M3 S25", "M4"]);
        assert!(plan.after.is_empty());
    }

    #[test]
    fn test_sd_commands() {
        assert_eq!(
            RepRapDialect::reprapfirmware()
                .sd_command(&SdOperation::List)
                .unwrap(),
            vec!["M20 S2"]
        );
        assert_eq!(
            RepRapDialect::marlin()
                .sd_command(&SdOperation::Play("a.gco".to_string()))
                .unwrap(),
            vec!["M23 a.gco", "M24"]
        );
        assert!(RepRapDialect::repetier().sd_command(&SdOperation::List).is_err());
        assert!(RepRapDialect::marlin()
            .sd_command(&SdOperation::Cd("dir".to_string()))
            .is_err());
    }

    #[test]
    fn test_credit_sizes() {
        let limits = FlowLimits::default();
        assert_eq!(
            RepRapDialect::reprapfirmware()
                .flow_credit(&limits, 0)
                .available_lines(),
            Some(5)
        );
        assert_eq!(
            RepRapDialect::marlin().flow_credit(&limits, 1).available_lines(),
            Some(1)
        );
    }
}
