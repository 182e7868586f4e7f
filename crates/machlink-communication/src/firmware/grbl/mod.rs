//! Grbl dialect
//!
//! Character-counting flow control against the 128 byte receive buffer,
//! realtime single-byte commands for hold, resume, reset and overrides.

pub mod error_decoder;
pub mod status_parser;

pub use status_parser::{Overrides, StatusReport};

use crate::communication::{FlowCredit, FlowLimits};
use crate::firmware::dialect::{
    g10_zero, goto_zero, num, require_jog, require_target, set_position, AxisSelector,
    ControlAction, Dialect, LaserPlan, MotionCommand, Outbound, OverrideChange, StatusPoll,
};
use machlink_core::{Feature, Firmware, FirmwareProfile, Result};
use std::collections::BTreeSet;

/// Realtime command bytes
pub mod realtime {
    pub const STATUS: u8 = b'?';
    pub const FEED_HOLD: u8 = b'!';
    pub const CYCLE_START: u8 = b'~';
    pub const SOFT_RESET: u8 = 0x18;
    pub const FEED_RESET: u8 = 0x90;
    pub const FEED_PLUS_10: u8 = 0x91;
    pub const FEED_MINUS_10: u8 = 0x92;
    pub const FEED_PLUS_1: u8 = 0x93;
    pub const FEED_MINUS_1: u8 = 0x94;
    pub const SPINDLE_RESET: u8 = 0x99;
    pub const SPINDLE_PLUS_10: u8 = 0x9A;
    pub const SPINDLE_MINUS_10: u8 = 0x9B;
    pub const SPINDLE_PLUS_1: u8 = 0x9C;
    pub const SPINDLE_MINUS_1: u8 = 0x9D;
    pub const SPINDLE_STOP: u8 = 0x9E;
}

/// Grbl 1.1d does not drop the spindle on feed hold by itself
const SPINDLE_STOP_ON_HOLD: &str = "1.1d";

#[derive(Debug, Default, Clone, Copy)]
pub struct GrblDialect;

impl GrblDialect {
    fn hold(profile: &FirmwareProfile) -> Vec<Outbound> {
        let mut out = vec![Outbound::byte(realtime::FEED_HOLD)];
        if profile.version == SPINDLE_STOP_ON_HOLD {
            out.push(Outbound::byte(realtime::SPINDLE_STOP));
        }
        out
    }

    /// Realtime byte for an override step; `base` is the reset code
    fn override_byte(base: u8, adjust: i32) -> Option<u8> {
        let offset = match adjust {
            0 => 0,
            10 => 1,
            -10 => 2,
            1 => 3,
            -1 => 4,
            _ => return None,
        };
        Some(base + offset)
    }
}

impl Dialect for GrblDialect {
    fn firmware(&self) -> Firmware {
        Firmware::Grbl
    }

    fn features(&self) -> BTreeSet<Feature> {
        [
            Feature::Jog,
            Feature::Home,
            Feature::Probe,
            Feature::FeedOverride,
            Feature::SpindleOverride,
            Feature::LaserTest,
            Feature::RealtimeCommands,
        ]
        .into_iter()
        .collect()
    }

    fn flow_credit(&self, limits: &FlowLimits, _pending: u32) -> FlowCredit {
        FlowCredit::bytes(limits.grbl_buffer_size)
    }

    fn status_poll(&self) -> StatusPoll {
        StatusPoll::Realtime(realtime::STATUS)
    }

    fn translate(&self, command: &MotionCommand) -> Result<Vec<String>> {
        let lines = match command {
            MotionCommand::Jog(step) => {
                let feed = require_jog(step)?;
                vec![format!("$J=G91{}{}F{}", step.dir, num(step.dist), feed)]
            }
            MotionCommand::JogTo(target) => {
                require_target(target)?;
                // jog lines are packed, no blanks between words
                let mut line = format!("$J=G9{}", if target.mode == 0 { 0 } else { 1 });
                for (letter, value) in [
                    ("X", target.target.x),
                    ("Y", target.target.y),
                    ("Z", target.target.z),
                ] {
                    if let Some(v) = value {
                        line.push_str(&format!("{}{}", letter, num(v)));
                    }
                }
                if let Some(feed) = target.feed {
                    line.push_str(&format!("F{}", feed.trunc() as i64));
                }
                vec![line]
            }
            MotionCommand::SetZero(axis) => vec![g10_zero(*axis)],
            MotionCommand::GotoZero(axis) => vec![goto_zero(*axis)],
            MotionCommand::SetPosition(coords) => vec![set_position(coords)?],
            MotionCommand::Home(AxisSelector::All | AxisSelector::Xyza) => vec!["$H".to_string()],
            MotionCommand::Home(axis) => {
                return Err(self.not_supported(&format!("home {:?}", axis).to_lowercase()))
            }
            MotionCommand::Probe(probe) => {
                let axis = probe.direction.to_uppercase();
                vec![
                    format!("G38.2 {}-5 F1", axis),
                    format!("G92 {}{}", axis, num(probe.offset)),
                ]
            }
        };
        Ok(lines)
    }

    fn control(&self, action: ControlAction, profile: &FirmwareProfile) -> Vec<Outbound> {
        match action {
            ControlAction::Pause => Self::hold(profile),
            ControlAction::Resume => vec![Outbound::byte(realtime::CYCLE_START)],
            ControlAction::Stop => {
                let mut out = Self::hold(profile);
                out.push(Outbound::byte(realtime::SOFT_RESET));
                out
            }
            ControlAction::ClearAlarm(_) => vec![Outbound::line("$X")],
            ControlAction::ResetMachine => vec![Outbound::byte(realtime::SOFT_RESET)],
        }
    }

    fn feed_override(&self, adjust: i32, _current: u32) -> OverrideChange {
        OverrideChange {
            output: Self::override_byte(realtime::FEED_RESET, adjust)
                .map(Outbound::byte)
                .into_iter()
                .collect(),
            value: None,
        }
    }

    fn spindle_override(&self, adjust: i32, _current: u32) -> OverrideChange {
        OverrideChange {
            output: Self::override_byte(realtime::SPINDLE_RESET, adjust)
                .map(Outbound::byte)
                .into_iter()
                .collect(),
            value: None,
        }
    }

    fn laser_on(
        &self,
        _power: f64,
        s_value: i64,
        duration_ms: u64,
        _profile: &FirmwareProfile,
    ) -> LaserPlan {
        LaserPlan {
            before: vec!["G1F1".to_string(), format!("M3S{}", s_value)],
            after: if duration_ms > 0 {
                vec![
                    format!("G4 P{}", num(duration_ms as f64 / 1000.0)),
                    "M5S0".to_string(),
                ]
            } else {
                Vec::new()
            },
        }
    }

    fn laser_off(&self) -> Vec<String> {
        vec!["M5S0".to_string()]
    }

    fn error_text(&self, code: u32) -> Option<&'static str> {
        error_decoder::error_text(code)
    }

    fn alarm_text(&self, code: u32) -> Option<&'static str> {
        error_decoder::alarm_text(code)
    }

    fn fault_releases_credit(&self) -> bool {
        true
    }
}
