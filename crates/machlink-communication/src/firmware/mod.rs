//! Firmware dialects, detection and telemetry
//!
//! Supported firmwares:
//! - Grbl: realtime bytes and character-counting flow control
//! - Smoothieware: Grbl-style reports, one line in flight
//! - TinyG: JSON mode with line-counting flow control
//! - Marlin, MarlinKimbra, Repetier, RepRapFirmware: `M114` polling and
//!   line-counting flow control

pub mod detector;
pub mod dialect;
pub mod grbl;
pub mod reprap;
pub mod smoothieware;
pub mod telemetry;
pub mod tinyg;

pub use detector::{DetectorConfig, DetectorStep, FirmwareDetector, ProbeStage};
pub use dialect::{
    laser_s_value, step_override, AxisSelector, ClearMethod, ControlAction, Coordinates, Dialect,
    JogStep, JogTarget, LaserPlan, MotionCommand, Outbound, OverrideChange, ProbeRequest,
    SdOperation, StatusPoll,
};
pub use grbl::GrblDialect;
pub use reprap::RepRapDialect;
pub use smoothieware::SmoothieDialect;
pub use telemetry::{PositionTracker, Telemetry, TelemetryParser};
pub use tinyg::TinyGDialect;

use machlink_core::{Firmware, FirmwareProfile};

/// Dialect implementation for a firmware
pub fn dialect_for(firmware: Firmware) -> Box<dyn Dialect> {
    match firmware {
        Firmware::Grbl => Box::new(GrblDialect),
        Firmware::Smoothie => Box::new(SmoothieDialect),
        Firmware::TinyG => Box::new(TinyGDialect),
        Firmware::Marlin => Box::new(RepRapDialect::marlin()),
        Firmware::MarlinKimbra => Box::new(RepRapDialect::marlin_kimbra()),
        Firmware::Repetier => Box::new(RepRapDialect::repetier()),
        Firmware::RepRapFirmware => Box::new(RepRapDialect::reprapfirmware()),
    }
}

/// Fill in the feature set of a freshly detected profile
pub fn complete_profile(mut profile: FirmwareProfile) -> FirmwareProfile {
    profile.features = dialect_for(profile.firmware).features();
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use machlink_core::Feature;

    #[test]
    fn test_registry_covers_every_firmware() {
        for firmware in Firmware::ALL {
            assert_eq!(dialect_for(firmware).firmware(), firmware);
        }
    }

    #[test]
    fn test_complete_profile_adds_features() {
        let profile = complete_profile(FirmwareProfile::new(Firmware::Smoothie, "edge"));
        assert!(profile.supports(Feature::SdCard));
        let profile = complete_profile(FirmwareProfile::new(Firmware::Grbl, "1.1f"));
        assert!(!profile.supports(Feature::SdCard));
    }
}
