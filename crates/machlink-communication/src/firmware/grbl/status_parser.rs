//! Bracketed status report parsing
//!
//! Grbl 1.1 reports `<Idle|MPos:1.000,2.000,0.000|FS:0,0|WCO:0.000,0.000,0.000>`
//! while Grbl 0.9 and Smoothie use commas between fields as well:
//! `<Idle,MPos:1.0000,2.0000,0.0000,WPos:1.0000,2.0000,0.0000>`.
//! Markers are matched case-insensitively and a field's values run until
//! the first token that is not a number, which covers both layouts.

use machlink_core::AxisPoint;

/// Override percentages from an `Ov:` field; any of them may be missing
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Overrides {
    pub feed: Option<f64>,
    pub rapid: Option<f64>,
    pub spindle: Option<f64>,
}

/// Everything a status report may carry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    /// Machine state word (Idle, Run, Hold, Alarm, Door, ...)
    pub state: Option<String>,
    /// Machine position
    pub mpos: Option<AxisPoint>,
    /// Work position
    pub wpos: Option<AxisPoint>,
    /// Work coordinate offset
    pub wco: Option<AxisPoint>,
    pub overrides: Option<Overrides>,
    /// Realtime feed rate from `FS:`
    pub feed: Option<f64>,
    /// Realtime spindle speed from `FS:`
    pub spindle: Option<f64>,
}

impl StatusReport {
    /// Parse a `<...>` line; fields that do not parse are left empty
    pub fn parse(line: &str) -> Self {
        let body = line.trim().trim_start_matches('<').trim_end_matches('>');

        let state = body
            .split(['|', ','])
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .map(str::to_string);

        let overrides = field_values(body, "ov:", 3).map(|v| Overrides {
            feed: v.first().copied(),
            rapid: v.get(1).copied(),
            spindle: v.get(2).copied(),
        });

        let fs = field_values(body, "fs:", 2);

        Self {
            state,
            mpos: field_values(body, "mpos:", 4).and_then(|v| to_point(&v)),
            wpos: field_values(body, "wpos:", 4).and_then(|v| to_point(&v)),
            wco: field_values(body, "wco:", 4).and_then(|v| to_point(&v)),
            overrides,
            feed: fs.as_ref().and_then(|v| v.first().copied()),
            spindle: fs.as_ref().and_then(|v| v.get(1).copied()),
        }
    }

    /// Work position, derived as `MPos - WCO` when only machine
    /// coordinates are reported
    pub fn work_position(&self, last_wco: Option<&AxisPoint>) -> Option<AxisPoint> {
        if self.wpos.is_some() {
            return self.wpos;
        }
        let mpos = self.mpos?;
        let wco = self.wco.as_ref().or(last_wco)?;
        Some(mpos.minus(wco))
    }

    /// Work offset, either reported directly or `MPos - WPos`
    pub fn work_offset(&self) -> Option<AxisPoint> {
        if self.wco.is_some() {
            return self.wco;
        }
        match (self.mpos, self.wpos) {
            (Some(mpos), Some(wpos)) => Some(mpos.minus(&wpos)),
            _ => None,
        }
    }
}

/// Numbers following `marker`, up to `max` of them
pub fn field_values(text: &str, marker: &str, max: usize) -> Option<Vec<f64>> {
    let start = find_ignore_case(text, marker)? + marker.len();
    let values: Vec<f64> = text[start..]
        .split([',', '|', ' '])
        .map_while(|token| token.trim().parse::<f64>().ok())
        .take(max)
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

/// Byte offset of the first case-insensitive occurrence of `needle`
pub fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn to_point(values: &[f64]) -> Option<AxisPoint> {
    if values.len() < 3 {
        return None;
    }
    let point = AxisPoint::new(values[0], values[1], values[2]);
    Some(match values.get(3) {
        Some(a) => point.with_a(*a),
        None => point,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grbl_11_report() {
        let report = StatusReport::parse(
            "<Run|MPos:10.000,20.000,-1.000|FS:500,12000|Ov:100,50,120|WCO:5.000,5.000,0.000>",
        );
        assert_eq!(report.state.as_deref(), Some("Run"));
        assert_eq!(report.mpos, Some(AxisPoint::new(10.0, 20.0, -1.0)));
        assert_eq!(report.feed, Some(500.0));
        assert_eq!(report.spindle, Some(12000.0));
        assert_eq!(
            report.overrides,
            Some(Overrides {
                feed: Some(100.0),
                rapid: Some(50.0),
                spindle: Some(120.0),
            })
        );
        assert_eq!(
            report.work_position(None),
            Some(AxisPoint::new(5.0, 15.0, -1.0))
        );
    }

    #[test]
    fn test_smoothie_comma_report() {
        let report =
            StatusReport::parse("<Idle,MPos:12.0000,7.0000,0.0000,WPos:2.0000,2.0000,0.0000>");
        assert_eq!(report.state.as_deref(), Some("Idle"));
        assert_eq!(report.mpos, Some(AxisPoint::new(12.0, 7.0, 0.0)));
        assert_eq!(report.wpos, Some(AxisPoint::new(2.0, 2.0, 0.0)));
        assert_eq!(report.work_offset(), Some(AxisPoint::new(10.0, 5.0, 0.0)));
    }

    #[test]
    fn test_four_axis_and_lowercase_markers() {
        let report = StatusReport::parse("<Idle|wpos:1,2,3,90|fs:0,0>");
        assert_eq!(report.wpos, Some(AxisPoint::new(1.0, 2.0, 3.0).with_a(90.0)));
    }

    #[test]
    fn test_work_position_uses_remembered_offset() {
        let report = StatusReport::parse("<Idle|MPos:3.000,3.000,3.000|FS:0,0>");
        assert_eq!(report.work_position(None), None);
        let wco = AxisPoint::new(1.0, 1.0, 1.0);
        assert_eq!(
            report.work_position(Some(&wco)),
            Some(AxisPoint::new(2.0, 2.0, 2.0))
        );
    }

    #[test]
    fn test_garbage_fields_ignored() {
        let report = StatusReport::parse("<Alarm|MPos:abc|Bf:15,128>");
        assert_eq!(report.state.as_deref(), Some("Alarm"));
        assert_eq!(report.mpos, None);
        assert_eq!(report.overrides, None);
    }
}
