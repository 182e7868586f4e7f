//! Flow-controlled command queue
//!
//! Holds pending command lines and releases them according to the active
//! firmware's backpressure rule. Three ledger shapes are supported:
//! - Byte credit: outstanding line sizes counted against the receive buffer (Grbl)
//! - Single slot: one unacknowledged line at a time (Smoothie)
//! - Line credit: a counter of lines the firmware will still accept
//!   (TinyG and the RepRap family)
//!
//! [`FlowQueue::drain`] never touches the transport. It returns the lines to
//! write and leaves the I/O to the caller.

use std::collections::VecDeque;

/// Buffer sizes used to build a ledger for a firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowLimits {
    /// Grbl receive buffer in bytes
    pub grbl_buffer_size: usize,
    /// TinyG lines in flight
    pub tinyg_credit: u32,
    /// Marlin / MarlinKimbra / Repetier lines in flight
    pub reprap_credit: u32,
    /// RepRapFirmware lines in flight
    pub reprapfirmware_credit: u32,
}

impl Default for FlowLimits {
    fn default() -> Self {
        Self {
            grbl_buffer_size: 128,
            tinyg_credit: 24,
            reprap_credit: 2,
            reprapfirmware_credit: 5,
        }
    }
}

/// Backpressure ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowCredit {
    /// Bytes in flight, oldest first; each entry is line length + 1
    ByteCredit {
        capacity: usize,
        ledger: VecDeque<usize>,
    },
    /// At most one line outstanding
    SingleSlot { blocked: bool },
    /// Lines the firmware still accepts, bounded by `max`
    LineCredit { max: u32, available: u32 },
}

impl FlowCredit {
    /// Byte ledger against a buffer of `capacity` bytes
    pub fn bytes(capacity: usize) -> Self {
        FlowCredit::ByteCredit {
            capacity,
            ledger: VecDeque::new(),
        }
    }

    /// Single outstanding line
    pub fn single_slot() -> Self {
        FlowCredit::SingleSlot { blocked: false }
    }

    /// Line counter starting full
    pub fn lines(max: u32) -> Self {
        FlowCredit::LineCredit {
            max,
            available: max,
        }
    }

    /// Line counter with `pending` acknowledgments still owed for lines sent earlier
    pub fn lines_with_pending(max: u32, pending: u32) -> Self {
        FlowCredit::LineCredit {
            max,
            available: max.saturating_sub(pending),
        }
    }

    /// Whether `line` may be written now
    pub fn admits(&self, line: &str) -> bool {
        match self {
            FlowCredit::ByteCredit { .. } => line.len() < self.byte_space(),
            FlowCredit::SingleSlot { blocked } => !blocked,
            FlowCredit::LineCredit { available, .. } => *available > 0,
        }
    }

    /// Account for `line` having been written
    fn take(&mut self, line: &str) {
        match self {
            FlowCredit::ByteCredit { ledger, .. } => ledger.push_back(line.len() + 1),
            FlowCredit::SingleSlot { blocked } => *blocked = true,
            FlowCredit::LineCredit { available, .. } => *available = available.saturating_sub(1),
        }
    }

    /// Return one line's worth of credit
    pub fn release(&mut self) {
        match self {
            FlowCredit::ByteCredit { ledger, .. } => {
                ledger.pop_front();
            }
            FlowCredit::SingleSlot { blocked } => *blocked = false,
            FlowCredit::LineCredit { max, available } => {
                if *available < *max {
                    *available += 1;
                }
            }
        }
    }

    /// Back to the initial state
    pub fn reset(&mut self) {
        match self {
            FlowCredit::ByteCredit { ledger, .. } => ledger.clear(),
            FlowCredit::SingleSlot { blocked } => *blocked = false,
            FlowCredit::LineCredit { max, available } => *available = *max,
        }
    }

    /// Bytes written but not yet acknowledged
    pub fn outstanding_bytes(&self) -> usize {
        match self {
            FlowCredit::ByteCredit { ledger, .. } => ledger.iter().sum(),
            _ => 0,
        }
    }

    fn byte_space(&self) -> usize {
        match self {
            FlowCredit::ByteCredit { capacity, .. } => {
                capacity.saturating_sub(self.outstanding_bytes())
            }
            _ => 0,
        }
    }

    /// Remaining line credit, `None` for the byte and slot ledgers
    pub fn available_lines(&self) -> Option<u32> {
        match self {
            FlowCredit::LineCredit { available, .. } => Some(*available),
            _ => None,
        }
    }
}

impl Default for FlowCredit {
    fn default() -> Self {
        FlowCredit::bytes(FlowLimits::default().grbl_buffer_size)
    }
}

/// Ordered lines plus a dispatch cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandQueue {
    lines: Vec<String>,
    cursor: usize,
}

impl CommandQueue {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Next line waiting for dispatch
    pub fn peek(&self) -> Option<&str> {
        self.lines.get(self.cursor).map(String::as_str)
    }

    fn advance(&mut self) -> Option<String> {
        let line = self.lines.get(self.cursor).cloned();
        if line.is_some() {
            self.cursor += 1;
        }
        line
    }

    /// Total lines held
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines already dispatched
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Lines not yet dispatched
    pub fn remaining(&self) -> usize {
        self.lines.len() - self.cursor
    }

    /// True once every held line has been dispatched
    pub fn is_complete(&self) -> bool {
        !self.lines.is_empty() && self.cursor >= self.lines.len()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.cursor = 0;
    }
}

/// Result of a drain pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Drained {
    /// Lines to write, in order, without newline
    pub lines: Vec<String>,
    /// The queue ran out during this pass and has been cleared
    pub completed: bool,
    /// Cursor position when the pass ended, before any completion reset
    pub cursor: usize,
}

/// Queue plus ledger for one connection
#[derive(Debug, Clone, Default)]
pub struct FlowQueue {
    queue: CommandQueue,
    urgent: VecDeque<String>,
    credit: FlowCredit,
}

impl FlowQueue {
    pub fn new(credit: FlowCredit) -> Self {
        Self {
            queue: CommandQueue::default(),
            urgent: VecDeque::new(),
            credit,
        }
    }

    /// Swap in the ledger for a newly identified firmware
    pub fn set_credit(&mut self, credit: FlowCredit) {
        self.credit = credit;
    }

    pub fn credit(&self) -> &FlowCredit {
        &self.credit
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Append a line to the job queue
    pub fn enqueue(&mut self, line: impl Into<String>) {
        self.queue.push(line);
    }

    /// Append a line that goes out ahead of the job queue, even while paused
    pub fn enqueue_urgent(&mut self, line: impl Into<String>) {
        self.urgent.push_back(line.into());
    }

    /// Lines queued but not yet dispatched
    pub fn remaining(&self) -> usize {
        self.queue.remaining() + self.urgent.len()
    }

    /// Release as many lines as the ledger allows
    ///
    /// Urgent lines go first and ignore `paused`. With nothing queued, or
    /// paused with no urgent lines, this writes nothing and leaves the
    /// ledger untouched.
    pub fn drain(&mut self, paused: bool) -> Drained {
        let mut drained = Drained::default();

        while let Some(line) = self.urgent.front() {
            if !self.credit.admits(line) {
                break;
            }
            self.credit.take(line);
            if let Some(line) = self.urgent.pop_front() {
                drained.lines.push(line);
            }
        }

        if !paused {
            while let Some(line) = self.queue.peek() {
                if !self.credit.admits(line) {
                    break;
                }
                self.credit.take(line);
                if let Some(line) = self.queue.advance() {
                    drained.lines.push(line);
                }
            }
        }

        drained.cursor = self.queue.cursor();
        if self.queue.is_complete() {
            // lines still in flight keep their credit until acknowledged
            self.queue.clear();
            drained.completed = true;
        }
        drained
    }

    /// One acknowledgment arrived
    pub fn acknowledge(&mut self) {
        self.credit.release();
    }

    /// Take one line credit outside the queue, for a status poll
    pub fn take_line_credit(&mut self) -> bool {
        match &mut self.credit {
            FlowCredit::LineCredit { available, .. } if *available > 0 => {
                *available -= 1;
                true
            }
            _ => false,
        }
    }

    /// Drop every queued line and restore the ledger
    pub fn reset(&mut self) {
        self.queue.clear();
        self.urgent.clear();
        self.credit.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_credit_blocks_until_ok() {
        let mut flow = FlowQueue::new(FlowCredit::bytes(10));
        flow.enqueue("G0 X10");
        flow.enqueue("G0 X20");

        let drained = flow.drain(false);
        assert_eq!(drained.lines, vec!["G0 X10"]);
        assert_eq!(flow.credit().outstanding_bytes(), 7);

        assert!(flow.drain(false).lines.is_empty());

        flow.acknowledge();
        let drained = flow.drain(false);
        assert_eq!(drained.lines, vec!["G0 X20"]);
        assert!(drained.completed);
    }

    #[test]
    fn test_oversized_line_never_sent() {
        let mut flow = FlowQueue::new(FlowCredit::bytes(8));
        flow.enqueue("G1 X100 Y100");
        assert!(flow.drain(false).lines.is_empty());
        assert_eq!(flow.queue().remaining(), 1);
    }

    #[test]
    fn test_single_slot() {
        let mut flow = FlowQueue::new(FlowCredit::single_slot());
        flow.enqueue("G0 X1");
        flow.enqueue("G0 X2");
        assert_eq!(flow.drain(false).lines.len(), 1);
        assert!(flow.drain(false).lines.is_empty());
        flow.acknowledge();
        assert_eq!(flow.drain(false).lines, vec!["G0 X2"]);
    }

    #[test]
    fn test_line_credit_saturates() {
        let mut credit = FlowCredit::lines(2);
        credit.release();
        assert_eq!(credit.available_lines(), Some(2));

        let credit = FlowCredit::lines_with_pending(2, 1);
        assert_eq!(credit.available_lines(), Some(1));
    }

    #[test]
    fn test_urgent_lane_ignores_pause_but_not_credit() {
        let mut flow = FlowQueue::new(FlowCredit::lines(1));
        flow.enqueue("G1 X1");
        flow.enqueue_urgent("M220 S120");
        flow.enqueue_urgent("M221 S80");

        let drained = flow.drain(true);
        assert_eq!(drained.lines, vec!["M220 S120"]);
        assert_eq!(flow.remaining(), 2);

        flow.acknowledge();
        assert_eq!(flow.drain(true).lines, vec!["M221 S80"]);
        flow.acknowledge();
        assert_eq!(flow.drain(false).lines, vec!["G1 X1"]);
    }

    #[test]
    fn test_completion_keeps_credit() {
        let mut flow = FlowQueue::new(FlowCredit::lines(24));
        flow.enqueue("G1 X10 Y10");
        flow.enqueue("G1 X20");
        let drained = flow.drain(false);
        assert!(drained.completed);
        assert_eq!(drained.cursor, 2);
        assert!(flow.queue().is_empty());
        assert_eq!(flow.credit().available_lines(), Some(22));
    }

    #[test]
    fn test_poll_credit() {
        let mut flow = FlowQueue::new(FlowCredit::lines(1));
        assert!(flow.take_line_credit());
        assert!(!flow.take_line_credit());

        let mut grbl = FlowQueue::new(FlowCredit::bytes(128));
        assert!(!grbl.take_line_credit());
    }
}
