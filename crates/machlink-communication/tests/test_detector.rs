use machlink_communication::firmware::{DetectorConfig, DetectorStep, FirmwareDetector, ProbeStage};
use machlink_core::{Feature, Firmware};
use std::time::Duration;
use tokio::time::Instant;

fn sent(steps: &[DetectorStep]) -> Vec<String> {
    steps
        .iter()
        .filter_map(|s| match s {
            DetectorStep::Send(bytes) => Some(String::from_utf8_lossy(bytes).trim_end().to_string()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_grbl_banner_short_circuits() {
    let start = Instant::now();
    let mut detector = FirmwareDetector::new(DetectorConfig::default(), start);

    let steps = detector.on_line("Grbl 1.1h ['$' for help]", start + Duration::from_millis(20));
    match steps.as_slice() {
        [DetectorStep::Resolved(profile)] => {
            assert_eq!(profile.firmware, Firmware::Grbl);
            assert_eq!(profile.version, "1.1h");
            assert!(profile.supports(Feature::RealtimeCommands));
        }
        other => panic!("unexpected steps {:?}", other),
    }

    // nothing further is probed once resolved
    assert_eq!(detector.deadline(), None);
    assert!(detector.on_timeout(start + Duration::from_secs(10)).is_empty());
}

#[test]
fn test_silence_walks_cascade_then_fails() {
    let start = Instant::now();
    let mut detector = FirmwareDetector::new(DetectorConfig::default(), start);
    let mut probes = Vec::new();

    while let Some(at) = detector.deadline() {
        let steps = detector.on_timeout(at);
        probes.extend(sent(&steps));
        if steps.contains(&DetectorStep::Failed) {
            break;
        }
    }

    assert_eq!(probes, vec!["version", "{fb:n}", "M115"]);
    assert_eq!(detector.stage(), ProbeStage::Failed);
    assert_eq!(detector.pending_acks(), 1);
}

#[test]
fn test_probe_timing_follows_config() {
    let start = Instant::now();
    let config = DetectorConfig {
        grbl_wait: Duration::from_millis(100),
        smoothie_wait: Duration::from_millis(200),
        tinyg_wait: Duration::from_millis(300),
        firmware_wait: Some(Duration::from_secs(2)),
        ..Default::default()
    };
    let mut detector = FirmwareDetector::new(config, start);

    assert_eq!(detector.deadline(), Some(start + Duration::from_millis(100)));
    detector.on_timeout(start + Duration::from_millis(100));
    assert_eq!(detector.deadline(), Some(start + Duration::from_millis(300)));
    detector.on_timeout(start + Duration::from_millis(300));
    assert_eq!(detector.deadline(), Some(start + Duration::from_millis(600)));
    detector.on_timeout(start + Duration::from_millis(600));
    assert_eq!(detector.stage(), ProbeStage::Identity);
    assert_eq!(detector.deadline(), Some(start + Duration::from_secs(2)));
}

#[test]
fn test_no_overall_deadline_never_fails() {
    let start = Instant::now();
    let config = DetectorConfig {
        firmware_wait: None,
        ..Default::default()
    };
    let mut detector = FirmwareDetector::new(config, start);
    for _ in 0..3 {
        if let Some(at) = detector.deadline() {
            detector.on_timeout(at);
        }
    }
    assert_eq!(detector.deadline(), None);
    assert_eq!(detector.stage(), ProbeStage::Identity);
}

#[test]
fn test_smoothie_reply_to_version_probe() {
    let start = Instant::now();
    let mut detector = FirmwareDetector::new(DetectorConfig::default(), start);
    detector.on_timeout(start + Duration::from_secs(1));

    let steps = detector.on_line(
        "Build version: edge-94de12c, Build date: Jan  2 2017 10:31:07, MCU: LPC1769, System Clock: 120MHz",
        start + Duration::from_millis(1100),
    );
    match steps.as_slice() {
        [DetectorStep::Resolved(profile)] => {
            assert_eq!(profile.firmware, Firmware::Smoothie);
            assert_eq!(profile.version, "edge-94de12c");
            assert!(profile.supports(Feature::SdCard));
        }
        other => panic!("unexpected steps {:?}", other),
    }
}

#[test]
fn test_reprap_start_then_identity() {
    let start = Instant::now();
    let mut detector = FirmwareDetector::new(DetectorConfig::default(), start);
    assert_eq!(sent(&detector.on_line("start", start)), vec!["M115"]);

    let steps = detector.on_line(
        "FIRMWARE_NAME:Repetier_1.0.3 FIRMWARE_URL:https://github.com/repetier/Repetier-Firmware/",
        start + Duration::from_millis(50),
    );
    assert!(matches!(
        steps.as_slice(),
        [DetectorStep::Resolved(p)] if p.firmware == Firmware::Repetier && p.version == "1.0."
    ));
}
