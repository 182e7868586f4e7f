//! Line framing
//!
//! Transports deliver arbitrary chunks. The framer drops carriage returns,
//! splits on `\n` and keeps an unterminated tail until the next chunk
//! completes it.

/// Reassembles transport chunks into protocol lines
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    /// Upper bound for an unterminated line before it is flushed as-is
    pub const MAX_LINE: usize = 4096;

    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                b'\r' => {}
                b'\n' => lines.push(self.take_pending()),
                _ => {
                    self.pending.push(byte);
                    if self.pending.len() >= Self::MAX_LINE {
                        tracing::warn!("Line exceeds {} bytes, flushing", Self::MAX_LINE);
                        lines.push(self.take_pending());
                    }
                }
            }
        }
        lines
    }

    /// Bytes held back waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop any partial line, used when a connection is torn down
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    fn take_pending(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_held_across_reads() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"<Idle|MPos:0.000,").is_empty());
        assert_eq!(framer.pending_len(), 17);
        let lines = framer.push(b"0.000,0.000>\r\nok\r\nGrb");
        assert_eq!(lines, vec!["<Idle|MPos:0.000,0.000,0.000>", "ok"]);
        assert_eq!(framer.push(b"l 1.1h\n"), vec!["Grbl 1.1h"]);
    }

    #[test]
    fn test_stray_carriage_returns_dropped() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"o\rk\n\n"), vec!["ok", ""]);
    }

    #[test]
    fn test_reset_discards_tail() {
        let mut framer = LineFramer::new();
        framer.push(b"half");
        framer.reset();
        assert_eq!(framer.push(b"ok\n"), vec!["ok"]);
    }

    #[test]
    fn test_overlong_line_flushed() {
        let mut framer = LineFramer::new();
        let lines = framer.push(&vec![b'x'; LineFramer::MAX_LINE]);
        assert_eq!(lines.len(), 1);
        assert_eq!(framer.pending_len(), 0);
    }
}
