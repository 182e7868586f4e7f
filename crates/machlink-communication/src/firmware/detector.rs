//! Firmware detection
//!
//! A probe cascade run once per connection. Banners the firmware sends on
//! its own are matched first; when none arrives the detector sends, in
//! turn, a Smoothie `version` query, a TinyG `{fb:n}` query and a RepRap
//! `M115`, each after its own wait. An overall deadline measured from the
//! moment the link opened ends the cascade.
//!
//! The detector owns no timer. The caller sleeps until [`FirmwareDetector::deadline`]
//! and then calls [`FirmwareDetector::on_timeout`]; since the deadline is
//! recomputed after every transition, a stale timer cannot fire against a
//! later stage or a later connection.

use super::complete_profile;
use super::grbl::status_parser::find_ignore_case;
use super::tinyg::{self, TinyGMessage};
use machlink_core::{Firmware, FirmwareProfile};
use std::time::Duration;
use tokio::time::Instant;

const VERSION_PROBE: &[u8] = b"version\n";
const TINYG_PROBE: &[u8] = b"{fb:n}\n";
const REPRAP_PROBE: &[u8] = b"M115\n";

/// Timing and opening behavior of the cascade
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Send ctrl-x instead of a newline when the link opens
    pub reset_on_connect: bool,
    /// Wait for a banner before the `version` probe
    pub grbl_wait: Duration,
    /// Wait for a Smoothie reply before the TinyG probe
    pub smoothie_wait: Duration,
    /// Wait for a TinyG reply before the RepRap probe
    pub tinyg_wait: Duration,
    /// Overall deadline; `None` keeps waiting forever
    pub firmware_wait: Option<Duration>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            reset_on_connect: false,
            grbl_wait: Duration::from_secs(1),
            smoothie_wait: Duration::from_secs(1),
            tinyg_wait: Duration::from_secs(1),
            firmware_wait: Some(Duration::from_secs(4)),
        }
    }
}

/// Where the cascade stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    /// Listening for an unsolicited banner
    Banner,
    /// `version` sent
    Version,
    /// `{fb:n}` sent
    Capability,
    /// `M115` sent
    Identity,
    Resolved,
    Failed,
}

/// What the caller has to do after feeding the detector
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorStep {
    /// Write a probe to the link
    Send(Vec<u8>),
    /// Firmware identified; the profile carries its feature set
    Resolved(FirmwareProfile),
    /// Nothing matched before the overall deadline
    Failed,
}

/// Probe cascade for one connection
#[derive(Debug, Clone)]
pub struct FirmwareDetector {
    config: DetectorConfig,
    stage: ProbeStage,
    give_up_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    pending_acks: u32,
}

impl FirmwareDetector {
    /// Start a cascade for a link that opened at `opened_at`
    pub fn new(config: DetectorConfig, opened_at: Instant) -> Self {
        let give_up_at = config.firmware_wait.map(|wait| opened_at + wait);
        let next_probe_at = Some(opened_at + config.grbl_wait);
        Self {
            config,
            stage: ProbeStage::Banner,
            give_up_at,
            next_probe_at,
            pending_acks: 0,
        }
    }

    /// Bytes written right after the link opens
    pub fn opening_bytes(&self) -> Vec<u8> {
        if self.config.reset_on_connect {
            vec![0x18]
        } else {
            b"\n".to_vec()
        }
    }

    pub fn stage(&self) -> ProbeStage {
        self.stage
    }

    /// Resolved or failed
    pub fn is_finished(&self) -> bool {
        matches!(self.stage, ProbeStage::Resolved | ProbeStage::Failed)
    }

    /// `M115` probes sent whose `ok` has not arrived yet; each one holds a
    /// line of credit once a line-credit firmware is bound
    pub fn pending_acks(&self) -> u32 {
        self.pending_acks
    }

    /// When [`Self::on_timeout`] next has something to do
    pub fn deadline(&self) -> Option<Instant> {
        if self.is_finished() {
            return None;
        }
        match (self.next_probe_at, self.give_up_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Advance the cascade for the time that has passed
    pub fn on_timeout(&mut self, now: Instant) -> Vec<DetectorStep> {
        if self.is_finished() {
            return Vec::new();
        }
        if self.give_up_at.is_some_and(|at| now >= at) {
            tracing::warn!("No supported firmware detected");
            self.stage = ProbeStage::Failed;
            return vec![DetectorStep::Failed];
        }
        let Some(due) = self.next_probe_at.filter(|at| now >= *at) else {
            return Vec::new();
        };

        let (probe, stage, next) = match self.stage {
            ProbeStage::Banner => (
                VERSION_PROBE,
                ProbeStage::Version,
                Some(due + self.config.smoothie_wait),
            ),
            ProbeStage::Version => (
                TINYG_PROBE,
                ProbeStage::Capability,
                Some(due + self.config.tinyg_wait),
            ),
            ProbeStage::Capability => {
                self.pending_acks += 1;
                (REPRAP_PROBE, ProbeStage::Identity, None)
            }
            _ => {
                self.next_probe_at = None;
                return Vec::new();
            }
        };
        tracing::debug!(
            "Sent probe {}",
            String::from_utf8_lossy(probe).trim_end()
        );
        self.stage = stage;
        self.next_probe_at = next;
        vec![DetectorStep::Send(probe.to_vec())]
    }

    /// Feed one framed line; an empty result means the line was not a
    /// banner and belongs to the caller
    pub fn on_line(&mut self, line: &str, now: Instant) -> Vec<DetectorStep> {
        if self.is_finished() {
            return Vec::new();
        }

        if let Some(profile) = identify(line) {
            tracing::info!("{} detected ({})", profile.firmware, profile.version);
            self.stage = ProbeStage::Resolved;
            self.next_probe_at = None;
            return vec![DetectorStep::Resolved(complete_profile(profile))];
        }

        if line.starts_with("start") {
            // RepRap firmwares print `start` before they answer M115
            self.pending_acks += 1;
            self.stage = ProbeStage::Identity;
            self.next_probe_at = None;
            return vec![DetectorStep::Send(REPRAP_PROBE.to_vec())];
        }

        if line.contains("Smoothie") {
            // welcome text without version details, ask for them right away
            self.stage = ProbeStage::Version;
            self.next_probe_at = Some(now + self.config.smoothie_wait);
            return vec![DetectorStep::Send(VERSION_PROBE.to_vec())];
        }

        Vec::new()
    }
}

/// Match a line that names its firmware
pub fn identify(line: &str) -> Option<FirmwareProfile> {
    if line.starts_with("Grbl") {
        return Some(FirmwareProfile::new(Firmware::Grbl, fixed(line, 5, 4)));
    }
    if line.contains("LPC176") {
        let version = after_marker(line, "version:", 9)
            .map(up_to_comma)
            .unwrap_or_default();
        let profile = FirmwareProfile::new(Firmware::Smoothie, version);
        return Some(match after_marker(line, "build date:", 12).map(up_to_comma) {
            Some(date) if !date.is_empty() => profile.with_date(date),
            _ => profile,
        });
    }
    if line.contains("FIRMWARE_NAME:Repetier") {
        let version = after_marker(line, "repetier_", 9)
            .map(|rest| fixed(rest, 0, 4))
            .unwrap_or_default();
        return Some(FirmwareProfile::new(Firmware::Repetier, version));
    }
    if line.contains("FIRMWARE_NAME:Marlin") {
        let version = after_marker(line, "marlin_", 7)
            .or_else(|| after_marker(line, "FIRMWARE_NAME:Marlin", 20))
            .map(|rest| fixed(rest.trim_start(), 0, 5))
            .unwrap_or_default();
        return Some(FirmwareProfile::new(Firmware::Marlin, version));
    }
    if line.contains("FIRMWARE_NAME:MK") {
        let version = after_marker(line, "mk_", 3)
            .map(|rest| fixed(rest, 0, 5))
            .unwrap_or_default();
        return Some(FirmwareProfile::new(Firmware::MarlinKimbra, version));
    }
    if line.contains("FIRMWARE_NAME: RepRapFirmware") {
        let version = after_marker(line, "firmware_version:", 17)
            .map(first_token)
            .unwrap_or_default();
        let profile = FirmwareProfile::new(Firmware::RepRapFirmware, version);
        return Some(match after_marker(line, "firmware_date:", 14).map(first_token) {
            Some(date) if !date.is_empty() => profile.with_date(date),
            _ => profile,
        });
    }
    if line.starts_with('{') {
        let messages = tinyg::response_parser::parse(line)?;
        return messages.into_iter().find_map(|message| match message {
            TinyGMessage::Firmware(build) => Some(FirmwareProfile::new(Firmware::TinyG, build)),
            _ => None,
        });
    }
    None
}

/// Text `skip` bytes past the case-insensitive `marker`
fn after_marker<'a>(line: &'a str, marker: &str, skip: usize) -> Option<&'a str> {
    let start = find_ignore_case(line, marker)? + skip;
    Some(line.get(start..).unwrap_or(""))
}

/// Up to `len` characters starting at character `start`
fn fixed(text: &str, start: usize, len: usize) -> String {
    text.chars().skip(start).take(len).collect::<String>().trim().to_string()
}

fn up_to_comma(text: &str) -> String {
    text.split(',').next().unwrap_or("").trim().to_string()
}

fn first_token(text: &str) -> String {
    text.split_whitespace().next().unwrap_or("").to_string()
}
