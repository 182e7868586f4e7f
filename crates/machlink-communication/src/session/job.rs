//! Job preparation and timing

use std::time::{Duration, Instant};

/// Cursor position after which throughput is worth logging
pub const THROUGHPUT_SAMPLE_LINES: usize = 500;

/// Split program text into wire lines
///
/// Text after `;` is dropped, lines are trimmed and blank lines skipped.
/// With `optimize` set, motion lines are compacted and a repeated motion
/// word is left out while the mode stays the same.
pub fn prepare_lines(text: &str, optimize: bool) -> Vec<String> {
    let mut optimizer = MotionCompactor::default();
    text.lines()
        .filter_map(|raw| {
            let line = raw.split(';').next().unwrap_or("").trim();
            if line.is_empty() {
                return None;
            }
            Some(if optimize {
                optimizer.compact(line)
            } else {
                line.to_string()
            })
        })
        .collect()
}

/// Tracks the active motion mode across lines
#[derive(Debug, Default)]
struct MotionCompactor {
    mode: Option<&'static str>,
}

impl MotionCompactor {
    fn compact(&mut self, line: &str) -> String {
        let first = line.chars().next().unwrap_or(' ').to_ascii_uppercase();
        if !matches!(first, 'G' | 'X' | 'Y' | 'Z' | 'A') {
            return line.to_string();
        }
        let packed: String = line.split_whitespace().collect();
        if first != 'G' {
            return packed;
        }

        let Some(mode) = motion_mode(&packed) else {
            self.mode = None;
            return packed;
        };
        let rest = &packed[mode.len()..];
        if self.mode == Some(mode) && !rest.is_empty() {
            return rest.to_string();
        }
        self.mode = Some(mode);
        packed
    }
}

/// `G0`..`G3` at the start of a packed line, not followed by another digit
fn motion_mode(packed: &str) -> Option<&'static str> {
    let upper = packed.to_ascii_uppercase();
    let mode = ["G0", "G1", "G2", "G3"]
        .into_iter()
        .find(|m| upper.starts_with(m))?;
    match upper[mode.len()..].chars().next() {
        Some(c) if c.is_ascii_digit() || c == '.' => None,
        _ => Some(mode),
    }
}

/// The program currently streaming
#[derive(Debug, Clone)]
pub struct Job {
    /// Submitted program text
    pub source: String,
    /// Lines enqueued
    pub line_count: usize,
    started: Instant,
    started_at: chrono::DateTime<chrono::Local>,
    sampled: bool,
}

impl Job {
    pub fn new(source: String, line_count: usize) -> Self {
        Self {
            source,
            line_count,
            started: Instant::now(),
            started_at: chrono::Local::now(),
            sampled: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Lines per second for `dispatched` lines so far
    pub fn throughput(&self, dispatched: usize) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            dispatched as f64 / secs
        } else {
            0.0
        }
    }

    /// Log throughput once the cursor passes the sample threshold
    pub fn sample(&mut self, cursor: usize) {
        if self.sampled || cursor < THROUGHPUT_SAMPLE_LINES {
            return;
        }
        self.sampled = true;
        tracing::debug!(
            "Done: {} of {} (ave. {:.0} lines/s)",
            cursor,
            self.line_count,
            self.throughput(cursor)
        );
    }

    /// Log the final statistics
    pub fn log_completion(&self, dispatched: usize) {
        tracing::info!(
            "Job started at {} finished after {:.1}s, {} lines (ave. {:.0} lines/s)",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.elapsed().as_secs_f64(),
            dispatched,
            self.throughput(dispatched)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_and_blanks_dropped() {
        let lines = prepare_lines("G1 X10 Y10\n; comment\n\n  G1 X20 ; move\r\n", false);
        assert_eq!(lines, vec!["G1 X10 Y10", "G1 X20"]);
    }

    #[test]
    fn test_optimize_drops_repeated_mode() {
        let lines = prepare_lines("G1 X1 Y1 F500\nG1 X2\nX3 Y3\nG0 Z5\nG10 L20 P0 X0\nG1 X4\n", true);
        assert_eq!(
            lines,
            vec!["G1X1Y1F500", "X2", "X3Y3", "G0Z5", "G10L20P0X0", "G1X4"]
        );
    }

    #[test]
    fn test_optimize_leaves_other_lines() {
        let lines = prepare_lines("M3 S1000\nG1 X1\nM5\nG1 X2\n", true);
        assert_eq!(lines, vec!["M3 S1000", "G1X1", "M5", "X2"]);
    }

    #[test]
    fn test_motion_mode_needs_word_boundary() {
        assert_eq!(motion_mode("G1X1"), Some("G1"));
        assert_eq!(motion_mode("G10L20"), None);
        assert_eq!(motion_mode("G38.2Z-5"), None);
        assert_eq!(motion_mode("G28"), None);
    }
}
