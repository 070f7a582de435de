//! Per-channel timing units.
//!
//! - [`PulseUnit`]: drives an output line high during `[start, stop)` of the
//!   cycle, in coarse ticks.
//! - [`GateUnit`]: latches the first input edge seen inside its window as a
//!   14-bit timestamp. Also used for the reference input.
//!
//! Window writes are staged and only become active at the next cycle
//! boundary ([`PulseUnit::begin_cycle`], [`GateUnit::begin_cycle`]), so a
//! cycle never sees a torn window.

use std::fmt;

use super::core_spec::{FINE_BITS, FINE_MASK, MIN_GATE_TIME, TIMESTAMP_MASK};

/// A 14-bit cycle-relative timestamp: `[13:3]` coarse, `[2:0]` fine.
///
/// Zero doubles as the "no event" sentinel on read-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u16);

impl Timestamp {
    /// The "no event" value.
    pub const NONE: Timestamp = Timestamp(0);

    /// Create from a raw value, truncated to 14 bits.
    pub fn new(raw: u32) -> Self {
        Self((raw & TIMESTAMP_MASK) as u16)
    }

    /// Create from a coarse tick and a fine offset.
    pub fn from_parts(coarse: u16, fine: u8) -> Self {
        Self::new(((coarse as u32) << FINE_BITS) | (fine as u32 & FINE_MASK))
    }

    /// Raw 14-bit value.
    pub fn raw(self) -> u16 {
        self.0
    }

    /// Coarse tick within the cycle.
    pub fn coarse(self) -> u16 {
        self.0 >> FINE_BITS
    }

    /// Fine offset within the coarse tick.
    pub fn fine(self) -> u8 {
        (self.0 as u32 & FINE_MASK) as u8
    }

    /// Whether this is the "no event" value.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.coarse(), self.fine())
    }
}

/// A `(start, stop)` pair, each truncated to 14 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingWindow {
    pub start: u16,
    pub stop: u16,
}

impl TimingWindow {
    /// All-zero window: output held off, gate never opens.
    pub const DISABLED: TimingWindow = TimingWindow { start: 0, stop: 0 };

    /// Create a window, masking both ends to the timestamp width.
    pub fn new(start: u32, stop: u32) -> Self {
        Self {
            start: (start & TIMESTAMP_MASK) as u16,
            stop: (stop & TIMESTAMP_MASK) as u16,
        }
    }

    /// Whether a cycle-relative gate with this window can open at all:
    /// both ends at or after [`MIN_GATE_TIME`] and `start < stop`.
    pub fn is_valid_gate(&self) -> bool {
        self.start >= MIN_GATE_TIME && self.stop >= MIN_GATE_TIME && self.start < self.stop
    }

    /// Half-open containment: `start <= t < stop`.
    #[inline]
    pub fn contains(&self, t: u16) -> bool {
        self.start <= t && t < self.stop
    }
}

impl fmt::Display for TimingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.stop)
    }
}

/// Output pulse generator.
#[derive(Debug, Clone, Default)]
pub struct PulseUnit {
    active: TimingWindow,
    pending: Option<TimingWindow>,
    output: bool,
}

impl PulseUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new window; it takes effect at the next cycle boundary.
    pub fn set_window(&mut self, window: TimingWindow) {
        self.pending = Some(window);
    }

    /// Most recently written window.
    pub fn window(&self) -> TimingWindow {
        self.pending.unwrap_or(self.active)
    }

    /// Window in effect for the current cycle.
    pub fn active_window(&self) -> TimingWindow {
        self.active
    }

    /// Cycle boundary: promote the staged window.
    pub fn begin_cycle(&mut self) {
        if let Some(window) = self.pending.take() {
            self.active = window;
        }
        self.output = false;
    }

    /// Evaluate the output for coarse tick `m` of the running cycle.
    ///
    /// `start == 0` forces the line low for the whole cycle.
    pub fn evaluate(&mut self, m: u16) -> bool {
        self.output = self.active.start != 0 && self.active.contains(m);
        self.output
    }

    /// Force the output low (core not running).
    pub fn clear(&mut self) {
        self.output = false;
    }

    /// Current output level.
    pub fn output(&self) -> bool {
        self.output
    }
}

/// Input gate with first-edge-wins timestamp latch.
#[derive(Debug, Clone, Default)]
pub struct GateUnit {
    active: TimingWindow,
    pending: Option<TimingWindow>,
    timestamp: Timestamp,
    triggered: bool,
}

impl GateUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a new window; it takes effect at the next cycle boundary.
    pub fn set_window(&mut self, window: TimingWindow) {
        self.pending = Some(window);
    }

    /// Most recently written window.
    pub fn window(&self) -> TimingWindow {
        self.pending.unwrap_or(self.active)
    }

    /// Window in effect for the current cycle.
    pub fn active_window(&self) -> TimingWindow {
        self.active
    }

    /// Cycle boundary: promote the staged window and clear the latch.
    pub fn begin_cycle(&mut self) {
        if let Some(window) = self.pending.take() {
            self.active = window;
        }
        self.clear();
    }

    /// Reset the latch to "no event".
    pub fn clear(&mut self) {
        self.timestamp = Timestamp::NONE;
        self.triggered = false;
    }

    /// Offer an edge at cycle-relative time `ts`.
    ///
    /// Returns true if this edge was latched. A window that fails
    /// [`TimingWindow::is_valid_gate`] never latches.
    pub fn observe(&mut self, ts: Timestamp) -> bool {
        if !self.active.is_valid_gate() {
            return false;
        }
        self.observe_offset(ts, ts.raw())
    }

    /// Offer an edge whose window position is measured from `reference`.
    ///
    /// Edges before the reference never latch. No minimum applies to the
    /// window here. The latched value is still
    /// the cycle-relative `ts`.
    pub fn observe_relative(&mut self, ts: Timestamp, reference: Timestamp) -> bool {
        match ts.raw().checked_sub(reference.raw()) {
            Some(offset) => self.observe_offset(ts, offset),
            None => false,
        }
    }

    fn observe_offset(&mut self, ts: Timestamp, position: u16) -> bool {
        if self.triggered || !self.active.contains(position) {
            return false;
        }
        self.triggered = true;
        self.timestamp = ts;
        true
    }

    /// Latched timestamp (zero if none this cycle).
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Whether an edge was latched this cycle.
    pub fn triggered(&self) -> bool {
        self.triggered
    }
}
