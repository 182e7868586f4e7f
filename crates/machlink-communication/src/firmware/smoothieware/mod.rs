//! Smoothieware dialect
//!
//! One line in flight at a time. Overrides are plain `M220`/`M221` lines
//! written immediately, laser tests use the `fire` console command, and the
//! SD card is driven through the console's file commands.

use crate::communication::{FlowCredit, FlowLimits};
use crate::firmware::dialect::{
    g0_jog, g0_jog_to, g10_zero, goto_zero, num, set_position, step_override, AxisSelector,
    ControlAction, Dialect, LaserPlan, MotionCommand, Outbound, OverrideChange, SdOperation,
    StatusPoll,
};
use chrono::NaiveDate;
use machlink_core::{Feature, Firmware, FirmwareProfile, Result};
use std::collections::BTreeSet;

/// Builds from this date on take the `G4 P` dwell in milliseconds
const MILLISECOND_DWELL_SINCE: (i32, u32, u32) = (2017, 1, 2);

const FEED_RANGE: (u32, u32) = (10, 200);
const SPINDLE_RANGE: (u32, u32) = (0, 200);

#[derive(Debug, Default, Clone, Copy)]
pub struct SmoothieDialect;

impl SmoothieDialect {
    /// Divider turning a dwell in milliseconds into the unit `G4 P` expects
    /// for this build. Unknown dates are treated as old builds.
    pub fn dwell_divider(profile: &FirmwareProfile) -> f64 {
        let cutoff = NaiveDate::from_ymd_opt(
            MILLISECOND_DWELL_SINCE.0,
            MILLISECOND_DWELL_SINCE.1,
            MILLISECOND_DWELL_SINCE.2,
        );
        match (profile.date.as_deref().and_then(parse_build_date), cutoff) {
            (Some(date), Some(cutoff)) if date >= cutoff => 1000.0,
            _ => 1.0,
        }
    }
}

/// Smoothie reports dates like `Jan  2 2017 10:31:07`; ISO dates are
/// accepted as well
pub fn parse_build_date(text: &str) -> Option<NaiveDate> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let date_only = normalized.split(' ').take(3).collect::<Vec<_>>().join(" ");
    NaiveDate::parse_from_str(&date_only, "%b %d %Y")
        .or_else(|_| NaiveDate::parse_from_str(&normalized, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(&date_only, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

impl Dialect for SmoothieDialect {
    fn firmware(&self) -> Firmware {
        Firmware::Smoothie
    }

    fn features(&self) -> BTreeSet<Feature> {
        [
            Feature::Jog,
            Feature::Home,
            Feature::Probe,
            Feature::FeedOverride,
            Feature::SpindleOverride,
            Feature::LaserTest,
            Feature::SdCard,
            Feature::RealtimeCommands,
        ]
        .into_iter()
        .collect()
    }

    fn flow_credit(&self, _limits: &FlowLimits, _pending: u32) -> FlowCredit {
        FlowCredit::single_slot()
    }

    fn status_poll(&self) -> StatusPoll {
        StatusPoll::Realtime(b'?')
    }

    fn translate(&self, command: &MotionCommand) -> Result<Vec<String>> {
        let lines = match command {
            MotionCommand::Jog(step) => g0_jog(step)?,
            MotionCommand::JogTo(target) => g0_jog_to(target)?,
            MotionCommand::SetZero(axis) => vec![g10_zero(*axis)],
            MotionCommand::GotoZero(axis) => vec![goto_zero(*axis)],
            MotionCommand::SetPosition(coords) => vec![set_position(coords)?],
            MotionCommand::Home(axis) => vec![match axis {
                AxisSelector::A => "G28.2 E1".to_string(),
                AxisSelector::All => "G28.2 X Y Z".to_string(),
                AxisSelector::Xyza => "G28.2 X Y Z E".to_string(),
                linear => format!("G28.2 {}", linear.letter().unwrap_or("X")),
            }],
            MotionCommand::Probe(probe) => {
                let axis = probe.direction.to_uppercase();
                if axis == "Z" {
                    vec![format!("G30 Z{}", num(probe.offset))]
                } else {
                    vec![format!("G38.2 {}", axis)]
                }
            }
        };
        Ok(lines)
    }

    fn control(&self, action: ControlAction, _profile: &FirmwareProfile) -> Vec<Outbound> {
        match action {
            ControlAction::Pause => vec![Outbound::byte(b'!')],
            ControlAction::Resume => vec![Outbound::byte(b'~')],
            ControlAction::Stop | ControlAction::ResetMachine => vec![Outbound::byte(0x18)],
            ControlAction::ClearAlarm(_) => vec![Outbound::line("$X"), Outbound::line("~")],
        }
    }

    fn feed_override(&self, adjust: i32, current: u32) -> OverrideChange {
        let value = step_override(current, adjust, FEED_RANGE.0, FEED_RANGE.1);
        OverrideChange {
            output: vec![Outbound::line(&format!("M220S{}", value))],
            value: Some(value),
        }
    }

    fn spindle_override(&self, adjust: i32, current: u32) -> OverrideChange {
        let value = step_override(current, adjust, SPINDLE_RANGE.0, SPINDLE_RANGE.1);
        OverrideChange {
            output: vec![Outbound::line(&format!("M221S{}", value))],
            value: Some(value),
        }
    }

    fn laser_on(
        &self,
        power: f64,
        _s_value: i64,
        duration_ms: u64,
        profile: &FirmwareProfile,
    ) -> LaserPlan {
        let mut after = Vec::new();
        if duration_ms > 0 {
            let dwell = duration_ms as f64 / Self::dwell_divider(profile);
            after.push(format!("G4P{}", num(dwell)));
            after.extend(self.laser_off());
        }
        LaserPlan {
            before: vec!["M3".to_string(), format!("fire {}", num(power))],
            after,
        }
    }

    fn laser_off(&self) -> Vec<String> {
        vec!["fire off".to_string(), "M5".to_string()]
    }

    fn sd_command(&self, op: &SdOperation) -> Result<Vec<String>> {
        let lines = match op {
            SdOperation::List => vec!["ls".to_string()],
            SdOperation::Cd(dir) => vec![format!("cd {}", dir)],
            SdOperation::Rm(file) => vec![format!("rm {}", file)],
            SdOperation::Mv { file, new_file } => vec![format!("mv {} {}", file, new_file)],
            SdOperation::Play(file) => vec![format!("play {}", file)],
            SdOperation::Pause => vec!["suspend".to_string()],
            SdOperation::Resume => vec!["resume".to_string()],
            SdOperation::Abort => vec!["abort".to_string()],
            SdOperation::Upload { filename, gcode } => {
                let mut lines = vec![format!("upload {}", filename)];
                lines.extend(gcode.lines().map(str::to_string));
                lines
            }
            SdOperation::Progress => vec!["progress".to_string()],
        };
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::dialect::ProbeRequest;

    fn dated(date: &str) -> FirmwareProfile {
        FirmwareProfile::new(Firmware::Smoothie, "edge-94de12c").with_date(date)
    }

    #[test]
    fn test_build_date_formats() {
        assert_eq!(
            parse_build_date("Jan  2 2017 10:31:07"),
            NaiveDate::from_ymd_opt(2017, 1, 2)
        );
        assert_eq!(
            parse_build_date("2019-05-21"),
            NaiveDate::from_ymd_opt(2019, 5, 21)
        );
        assert_eq!(parse_build_date("unknown"), None);
    }

    #[test]
    fn test_dwell_divider_follows_build_date() {
        assert_eq!(SmoothieDialect::dwell_divider(&dated("Jan  2 2017 10:31:07")), 1000.0);
        assert_eq!(SmoothieDialect::dwell_divider(&dated("Dec 30 2016 09:00:00")), 1.0);
        assert_eq!(
            SmoothieDialect::dwell_divider(&FirmwareProfile::new(Firmware::Smoothie, "1")),
            1.0
        );
    }

    #[test]
    fn test_laser_plan() {
        let plan = SmoothieDialect.laser_on(25.0, 0, 2000, &dated("Mar 10 2018 12:00:00"));
        assert_eq!(plan.before, vec!["M3", "fire 25"]);
        assert_eq!(plan.after, vec!["G4P2", "fire off", "M5"]);
    }

    #[test]
    fn test_overrides_written_immediately() {
        let change = SmoothieDialect.feed_override(10, 195);
        assert_eq!(change.value, Some(195));
        assert_eq!(change.output, vec![Outbound::line("M220S195")]);

        let change = SmoothieDialect.spindle_override(-10, 5);
        assert_eq!(change.value, Some(5));
        let change = SmoothieDialect.spindle_override(0, 60);
        assert_eq!(change.output, vec![Outbound::line("M221S100")]);
    }

    #[test]
    fn test_probe_z_uses_g30() {
        let probe = |direction: &str| {
            MotionCommand::Probe(ProbeRequest {
                direction: direction.to_string(),
                offset: 1.5,
            })
        };
        assert_eq!(SmoothieDialect.translate(&probe("z")).unwrap(), vec!["G30 Z1.5"]);
        assert_eq!(SmoothieDialect.translate(&probe("x")).unwrap(), vec!["G38.2 X"]);
    }

    #[test]
    fn test_sd_upload_streams_file() {
        let op = SdOperation::Upload {
            filename: "part.nc".to_string(),
            gcode: "G0 X1\nG0 X2\n".to_string(),
        };
        assert_eq!(
            SmoothieDialect.sd_command(&op).unwrap(),
            vec!["upload part.nc", "G0 X1", "G0 X2"]
        );
    }

    #[test]
    fn test_clear_alarm_unlocks_and_resumes() {
        let out = SmoothieDialect.control(
            ControlAction::ClearAlarm(crate::firmware::dialect::ClearMethod::Flush),
            &dated("x"),
        );
        assert_eq!(out, vec![Outbound::line("$X"), Outbound::line("~")]);
    }
}
