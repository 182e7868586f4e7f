//! Firmware identification

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The firmwares the gateway can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    /// Grbl (0.9 / 1.1)
    Grbl,
    /// Smoothieware
    Smoothie,
    /// TinyG (JSON mode)
    #[serde(rename = "tinyg")]
    TinyG,
    /// Marlin
    Marlin,
    /// MarlinKimbra
    #[serde(rename = "marlinkimbra")]
    MarlinKimbra,
    /// Repetier
    Repetier,
    /// RepRapFirmware (Duet)
    #[serde(rename = "reprapfirmware")]
    RepRapFirmware,
}

impl Firmware {
    /// All supported firmwares
    pub const ALL: [Firmware; 7] = [
        Firmware::Grbl,
        Firmware::Smoothie,
        Firmware::TinyG,
        Firmware::Marlin,
        Firmware::MarlinKimbra,
        Firmware::Repetier,
        Firmware::RepRapFirmware,
    ];

    /// Wire tag used in events
    pub fn tag(&self) -> &'static str {
        match self {
            Firmware::Grbl => "grbl",
            Firmware::Smoothie => "smoothie",
            Firmware::TinyG => "tinyg",
            Firmware::Marlin => "marlin",
            Firmware::MarlinKimbra => "marlinkimbra",
            Firmware::Repetier => "repetier",
            Firmware::RepRapFirmware => "reprapfirmware",
        }
    }

    /// True for the 3D-printer style firmwares that answer `M115`/`M114`
    pub fn is_reprap_family(&self) -> bool {
        matches!(
            self,
            Firmware::Marlin
                | Firmware::MarlinKimbra
                | Firmware::Repetier
                | Firmware::RepRapFirmware
        )
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Optional capabilities a dialect may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    /// Relative jogging
    Jog,
    /// Homing cycle
    Home,
    /// Probing
    Probe,
    /// Feed rate override
    FeedOverride,
    /// Spindle / laser power override
    SpindleOverride,
    /// Laser test fire
    LaserTest,
    /// SD card file operations
    SdCard,
    /// Single-byte realtime commands
    RealtimeCommands,
}

/// Identified firmware bound to a connection
///
/// Immutable for the life of the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareProfile {
    /// Which dialect
    pub firmware: Firmware,
    /// Version string as reported (may be empty)
    pub version: String,
    /// Build date, only some firmwares report one
    #[serde(default)]
    pub date: Option<String>,
    /// Features offered by the dialect
    #[serde(default)]
    pub features: BTreeSet<Feature>,
}

impl FirmwareProfile {
    /// Create a profile without date or features
    pub fn new(firmware: Firmware, version: impl Into<String>) -> Self {
        Self {
            firmware,
            version: version.into(),
            date: None,
            features: BTreeSet::new(),
        }
    }

    /// Set the build date
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Check a feature
    pub fn supports(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

impl fmt::Display for FirmwareProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.firmware, self.version)?;
        if let Some(date) = &self.date {
            write!(f, " ({})", date)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_tags_round_trip_through_serde() {
        for fw in Firmware::ALL {
            let json = serde_json::to_string(&fw).unwrap();
            assert_eq!(json, format!("\"{}\"", fw.tag()));
        }
    }

    #[test]
    fn test_reprap_family() {
        assert!(Firmware::Marlin.is_reprap_family());
        assert!(Firmware::RepRapFirmware.is_reprap_family());
        assert!(!Firmware::TinyG.is_reprap_family());
        assert!(!Firmware::Grbl.is_reprap_family());
    }
}
