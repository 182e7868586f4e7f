//! TinyG dialect
//!
//! JSON mode with line-counting flow control. TinyG pushes status reports
//! itself, so there is no poll.

pub mod response_parser;

pub use response_parser::{PositionUpdate, TinyGMessage};

use crate::communication::{FlowCredit, FlowLimits};
use crate::firmware::dialect::{
    g0_jog, g0_jog_to, g10_zero, goto_zero, num, set_position, AxisSelector, ClearMethod,
    ControlAction, Dialect, LaserPlan, MotionCommand, Outbound, StatusPoll,
};
use machlink_core::{Feature, Firmware, FirmwareProfile, Result};
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, Copy)]
pub struct TinyGDialect;

impl Dialect for TinyGDialect {
    fn firmware(&self) -> Firmware {
        Firmware::TinyG
    }

    fn features(&self) -> BTreeSet<Feature> {
        [
            Feature::Jog,
            Feature::Home,
            Feature::LaserTest,
            Feature::RealtimeCommands,
        ]
        .into_iter()
        .collect()
    }

    fn flow_credit(&self, limits: &FlowLimits, pending: u32) -> FlowCredit {
        FlowCredit::lines_with_pending(limits.tinyg_credit, pending)
    }

    fn status_poll(&self) -> StatusPoll {
        StatusPoll::None
    }

    fn translate(&self, command: &MotionCommand) -> Result<Vec<String>> {
        let lines = match command {
            MotionCommand::Jog(step) => g0_jog(step)?,
            MotionCommand::JogTo(target) => g0_jog_to(target)?,
            MotionCommand::SetZero(axis) => vec![g10_zero(*axis)],
            MotionCommand::GotoZero(axis) => vec![goto_zero(*axis)],
            MotionCommand::SetPosition(coords) => vec![set_position(coords)?],
            MotionCommand::Home(axis) => vec![match axis {
                AxisSelector::A => "G28.2 A0".to_string(),
                AxisSelector::All => "G28.2 X0 Y0 Z0".to_string(),
                AxisSelector::Xyza => "G28.2 X0 Y0 Z0 A0".to_string(),
                linear => format!("G28.2 {}0", linear.letter().unwrap_or("X")),
            }],
            MotionCommand::Probe(_) => return Err(self.not_supported(command.name())),
        };
        Ok(lines)
    }

    fn control(&self, action: ControlAction, _profile: &FirmwareProfile) -> Vec<Outbound> {
        match action {
            ControlAction::Pause => vec![Outbound::byte(b'!')],
            ControlAction::Resume => vec![Outbound::byte(b'~')],
            // hold, then flush the planner
            ControlAction::Stop => vec![Outbound::byte(b'!'), Outbound::byte(b'%')],
            ControlAction::ClearAlarm(ClearMethod::Lockout) => vec![Outbound::line("$X")],
            ControlAction::ClearAlarm(ClearMethod::Flush) => vec![Outbound::byte(b'%')],
            ControlAction::ResetMachine => vec![Outbound::byte(0x18)],
        }
    }

    fn laser_on(
        &self,
        _power: f64,
        s_value: i64,
        duration_ms: u64,
        _profile: &FirmwareProfile,
    ) -> LaserPlan {
        let mut after = Vec::new();
        if duration_ms > 0 {
            after.push(format!("G4 P{}", num(duration_ms as f64 / 1000.0)));
            after.extend(self.laser_off());
        }
        LaserPlan {
            before: vec!["G1F1".to_string(), format!("M3S{}", s_value)],
            after,
        }
    }

    fn laser_off(&self) -> Vec<String> {
        vec!["M5S0".to_string()]
    }
}
