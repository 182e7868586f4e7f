//! Firmware dialect abstraction
//!
//! A [`Dialect`] turns the panel's uniform command vocabulary into the wire
//! forms one firmware understands, picks the flow-control ledger, and
//! supplies the code tables used to render faults.

use crate::communication::{FlowCredit, FlowLimits};
use machlink_core::{ControllerError, Feature, Firmware, FirmwareProfile, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Axis argument of home / setZero / gotoZero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxisSelector {
    X,
    Y,
    Z,
    A,
    /// X, Y and Z
    All,
    /// X, Y, Z and the 4th axis
    Xyza,
}

impl AxisSelector {
    /// Upper-case letter for a single linear axis
    pub fn letter(&self) -> Option<&'static str> {
        match self {
            AxisSelector::X => Some("X"),
            AxisSelector::Y => Some("Y"),
            AxisSelector::Z => Some("Z"),
            _ => None,
        }
    }
}

/// Optional per-axis values
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Coordinates {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub a: Option<f64>,
}

impl Coordinates {
    /// At least one linear axis is given
    pub fn has_xyz(&self) -> bool {
        self.x.is_some() || self.y.is_some() || self.z.is_some()
    }

    /// `X1 Y2`-style words for the axes present, 4th axis last when asked for
    fn words(&self, with_a: bool) -> Vec<String> {
        let mut words = Vec::new();
        for (letter, value) in [("X", self.x), ("Y", self.y), ("Z", self.z)] {
            if let Some(v) = value {
                words.push(format!("{}{}", letter, num(v)));
            }
        }
        if with_a {
            if let Some(a) = self.a {
                words.push(format!("A{}", num(a)));
            }
        }
        words
    }
}

/// Relative jog by a distance along one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JogStep {
    /// Axis letter, e.g. `X`
    pub dir: String,
    /// Signed distance
    pub dist: f64,
    /// Feed rate, truncated to an integer on the wire
    pub feed: f64,
}

/// Jog to a target, absolute when `mode` is 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JogTarget {
    #[serde(flatten)]
    pub target: Coordinates,
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub feed: Option<f64>,
}

/// Probe along an axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// Axis letter as sent by the panel, e.g. `z`
    pub direction: String,
    /// Probe plate thickness
    #[serde(rename = "probeOffset", default)]
    pub offset: f64,
}

/// Queued motion commands
#[derive(Debug, Clone, PartialEq)]
pub enum MotionCommand {
    Jog(JogStep),
    JogTo(JogTarget),
    SetZero(AxisSelector),
    GotoZero(AxisSelector),
    SetPosition(Coordinates),
    Home(AxisSelector),
    Probe(ProbeRequest),
}

impl MotionCommand {
    /// Action name, used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            MotionCommand::Jog(_) => "jog",
            MotionCommand::JogTo(_) => "jogTo",
            MotionCommand::SetZero(_) => "setZero",
            MotionCommand::GotoZero(_) => "gotoZero",
            MotionCommand::SetPosition(_) => "setPosition",
            MotionCommand::Home(_) => "home",
            MotionCommand::Probe(_) => "probe",
        }
    }
}

/// How an alarm is cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMethod {
    /// Unlock only
    Lockout,
    /// Unlock and flush the queue
    Flush,
}

impl TryFrom<u8> for ClearMethod {
    type Error = ControllerError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(ClearMethod::Lockout),
            2 => Ok(ClearMethod::Flush),
            other => Err(ControllerError::InvalidParameters {
                reason: format!("unknown clearAlarm method {}", other),
            }),
        }
    }
}

/// Immediate control actions, never queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
    Stop,
    ClearAlarm(ClearMethod),
    ResetMachine,
}

/// SD card file operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdOperation {
    List,
    Cd(String),
    Rm(String),
    Mv { file: String, new_file: String },
    Play(String),
    Pause,
    Resume,
    Abort,
    Upload { filename: String, gcode: String },
    Progress,
}

impl SdOperation {
    pub fn name(&self) -> &'static str {
        match self {
            SdOperation::List => "sd.list",
            SdOperation::Cd(_) => "sd.cd",
            SdOperation::Rm(_) => "sd.rm",
            SdOperation::Mv { .. } => "sd.mv",
            SdOperation::Play(_) => "sd.play",
            SdOperation::Pause => "sd.pause",
            SdOperation::Resume => "sd.resume",
            SdOperation::Abort => "sd.abort",
            SdOperation::Upload { .. } => "sd.upload",
            SdOperation::Progress => "sd.progress",
        }
    }
}

/// Traffic that bypasses the job queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Written as-is right away
    Immediate(Vec<u8>),
    /// Sent through the urgent lane, consuming line credit
    Credited(String),
}

impl Outbound {
    /// A newline-terminated line written right away
    pub fn line(text: &str) -> Self {
        Outbound::Immediate(format!("{}\n", text).into_bytes())
    }

    /// A single realtime byte
    pub fn byte(b: u8) -> Self {
        Outbound::Immediate(vec![b])
    }
}

/// Result of an override request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideChange {
    pub output: Vec<Outbound>,
    /// New value to report, when the gateway tracks it
    pub value: Option<u32>,
}

/// Lines queued for a laser test fire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaserPlan {
    /// Turn the laser on
    pub before: Vec<String>,
    /// Dwell and turn it off again; empty when the test stays on
    pub after: Vec<String>,
}

/// Periodic status request of a dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPoll {
    /// Firmware reports on its own
    None,
    /// Single realtime byte
    Realtime(u8),
    /// `M114`, one outstanding at a time and paid for with line credit
    PositionQuery,
}

/// Firmware-specific behavior bound to a connection
pub trait Dialect: Send + Sync {
    /// Which firmware this is
    fn firmware(&self) -> Firmware;

    /// Optional features this firmware offers
    fn features(&self) -> BTreeSet<Feature>;

    /// Ledger used by the flow queue; `pending` acknowledgments are still owed
    fn flow_credit(&self, limits: &FlowLimits, pending: u32) -> FlowCredit;

    /// How telemetry is requested
    fn status_poll(&self) -> StatusPoll;

    /// Queue lines for a motion command
    fn translate(&self, command: &MotionCommand) -> Result<Vec<String>>;

    /// Bytes for an immediate control action
    fn control(&self, action: ControlAction, profile: &FirmwareProfile) -> Vec<Outbound>;

    /// Adjust the feed override; 0 resets to 100%
    fn feed_override(&self, _adjust: i32, _current: u32) -> OverrideChange {
        OverrideChange::default()
    }

    /// Adjust the spindle override; 0 resets to 100%
    fn spindle_override(&self, _adjust: i32, _current: u32) -> OverrideChange {
        OverrideChange::default()
    }

    /// Lines that fire the laser at `s_value` (or `power` percent where the
    /// firmware takes a percentage) and optionally turn it off after `duration_ms`
    fn laser_on(
        &self,
        power: f64,
        s_value: i64,
        duration_ms: u64,
        profile: &FirmwareProfile,
    ) -> LaserPlan;

    /// Lines that turn a running laser test off
    fn laser_off(&self) -> Vec<String>;

    /// Wire lines for an SD card operation, written right away
    fn sd_command(&self, op: &SdOperation) -> Result<Vec<String>> {
        Err(self.not_supported(op.name()))
    }

    /// Readable text for an `error:N` code, `None` forwards the line raw
    fn error_text(&self, _code: u32) -> Option<&'static str> {
        None
    }

    /// Readable text for an `ALARM:N` code, `None` forwards the line raw
    fn alarm_text(&self, _code: u32) -> Option<&'static str> {
        None
    }

    /// `error` and `ALARM` lines also acknowledge a line
    fn fault_releases_credit(&self) -> bool {
        false
    }

    /// Error for a command this firmware has no wire form for
    fn not_supported(&self, command: &str) -> machlink_core::Error {
        machlink_core::Error::not_supported(command, self.firmware())
    }
}

/// Shortest decimal rendering, `10` rather than `10.0`
pub fn num(value: f64) -> String {
    format!("{}", value)
}

/// `S` value for a laser at `power` percent of `max_s`
pub fn laser_s_value(power: f64, max_s: f64) -> i64 {
    (power * max_s / 100.0).trunc() as i64
}

/// Step an override, ignoring steps that would leave `min..=max`
pub fn step_override(current: u32, adjust: i32, min: u32, max: u32) -> u32 {
    if adjust == 0 {
        return 100;
    }
    let next = current as i64 + adjust as i64;
    if next >= min as i64 && next <= max as i64 {
        next as u32
    } else {
        current
    }
}

pub(crate) fn require_jog(step: &JogStep) -> Result<i64> {
    let feed = step.feed.trunc() as i64;
    if step.dir.trim().is_empty() || step.dist == 0.0 || feed == 0 {
        return Err(machlink_core::Error::invalid_parameters(
            "jog needs a direction, a distance and a feed",
        ));
    }
    Ok(feed)
}

pub(crate) fn require_target(target: &JogTarget) -> Result<()> {
    if !target.target.has_xyz() {
        return Err(machlink_core::Error::invalid_parameters(
            "jogTo needs at least one of x, y or z",
        ));
    }
    Ok(())
}

/// `G90` for absolute targets, `G91` otherwise
pub(crate) fn distance_mode(target: &JogTarget) -> &'static str {
    if target.mode == 0 {
        "G90"
    } else {
        "G91"
    }
}

/// Feed word and axis words of a jogTo, in the order they go on the wire
pub(crate) fn target_words(target: &JogTarget) -> Vec<String> {
    let mut words = Vec::new();
    if let Some(feed) = target.feed {
        words.push(format!("F{}", feed.trunc() as i64));
    }
    words.extend(target.target.words(false));
    words
}

/// `G10 L20 P0` zeroing used by the CNC firmwares
pub(crate) fn g10_zero(axis: AxisSelector) -> String {
    match axis {
        AxisSelector::A => "G10 L20 P0 A0".to_string(),
        AxisSelector::All => "G10 L20 P0 X0 Y0 Z0".to_string(),
        AxisSelector::Xyza => "G10 L20 P0 X0 Y0 Z0 A0".to_string(),
        linear => format!("G10 L20 P0 {}0", linear.letter().unwrap_or("X")),
    }
}

/// `G92` zeroing used by the printer firmwares; the 4th axis is the extruder
pub(crate) fn g92_zero(axis: AxisSelector) -> String {
    match axis {
        AxisSelector::A => "G92 E0".to_string(),
        AxisSelector::All => "G92 X0 Y0 Z0".to_string(),
        AxisSelector::Xyza => "G92 X0 Y0 Z0 E0".to_string(),
        linear => format!("G92 {}0", linear.letter().unwrap_or("X")),
    }
}

/// Rapid back to work zero, identical on every firmware
pub(crate) fn goto_zero(axis: AxisSelector) -> String {
    match axis {
        AxisSelector::A => "G0 A0".to_string(),
        AxisSelector::All => "G0 X0 Y0 Z0".to_string(),
        AxisSelector::Xyza => "G0 X0 Y0 Z0 A0".to_string(),
        linear => format!("G0 {}0", linear.letter().unwrap_or("X")),
    }
}

/// `G10 L20 P0` with explicit values, identical on every firmware
pub(crate) fn set_position(coords: &Coordinates) -> Result<String> {
    if !coords.has_xyz() {
        return Err(machlink_core::Error::invalid_parameters(
            "setPosition needs at least one of x, y or z",
        ));
    }
    Ok(format!("G10 L20 P0 {}", coords.words(true).join(" ")))
}

/// Relative `G0` jog shared by Smoothie, TinyG, Repetier and MarlinKimbra
pub(crate) fn g0_jog(step: &JogStep) -> Result<Vec<String>> {
    let feed = require_jog(step)?;
    Ok(vec![
        "G91".to_string(),
        format!("G0 F{}{}{}", feed, step.dir, num(step.dist)),
        "G90".to_string(),
    ])
}

/// `G0` jogTo shared by Smoothie, TinyG, Repetier and MarlinKimbra
pub(crate) fn g0_jog_to(target: &JogTarget) -> Result<Vec<String>> {
    require_target(target)?;
    Ok(vec![
        distance_mode(target).to_string(),
        format!("G0 {}", target_words(target).join(" ")),
        "G90".to_string(),
    ])
}
