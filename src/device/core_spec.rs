//! Entangler core specification constants.
//!
//! Widths and default counts of the gateware core. The counts can be
//! overridden per instance through [`crate::config::Settings`]; the widths
//! are fixed by the RTIO PHY and are not configurable.

// ============================================================================
// Timestamp format
// ============================================================================

/// Width of a full timestamp: coarse time plus fine time.
pub const TIMESTAMP_WIDTH: u32 = 14;

/// Fine-time bits (sub-tick resolution from the SERDES PHY).
pub const FINE_BITS: u32 = 3;

/// Coarse counter width. Cycle lengths are masked to this width so that a
/// timestamp never overflows within a cycle.
pub const COARSE_WIDTH: u32 = TIMESTAMP_WIDTH - FINE_BITS;

/// Mask for a full 14-bit timestamp.
pub const TIMESTAMP_MASK: u32 = (1 << TIMESTAMP_WIDTH) - 1;

/// Mask for the fine-time bits.
pub const FINE_MASK: u32 = (1 << FINE_BITS) - 1;

/// Mask for the coarse cycle counter / cycle length.
pub const COARSE_MASK: u32 = (1 << COARSE_WIDTH) - 1;

/// Earliest valid start or stop of a cycle-relative input window: one coarse
/// tick, so that a latched timestamp is never the zero "no event" value.
pub const MIN_GATE_TIME: u16 = 1 << FINE_BITS;

/// Duration of one coarse tick in nanoseconds.
pub const COARSE_PERIOD_NS: u32 = 8;

// ============================================================================
// Run counters
// ============================================================================

/// Width of the completed-cycle counter (wraps silently).
pub const CYCLE_COUNT_WIDTH: u32 = 14;

/// Mask for the completed-cycle counter.
pub const CYCLE_COUNT_MASK: u32 = (1 << CYCLE_COUNT_WIDTH) - 1;

/// Width of the reference trigger counter (wraps silently).
pub const TRIGGER_COUNT_WIDTH: u32 = 14;

/// Mask for the reference trigger counter.
pub const TRIGGER_COUNT_MASK: u32 = (1 << TRIGGER_COUNT_WIDTH) - 1;

// ============================================================================
// Register bus
// ============================================================================

/// Width of the register data word.
pub const DATA_WIDTH: u32 = 32;

/// Bits of the control field at the top of a register address.
pub const CONTROL_BITS: u32 = 2;

/// Minimum selector width: the four special registers must be addressable.
pub const MIN_SELECTOR_BITS: u32 = 2;

/// Bit offset of the stop field in a channel timing word.
pub const TIMING_STOP_SHIFT: u32 = 16;

// ============================================================================
// Default layout
// ============================================================================

/// Default number of output (pulse) channels.
pub const DEFAULT_NUM_OUTPUTS: usize = 4;

/// Default number of gated input signals.
pub const DEFAULT_NUM_INPUTS: usize = 4;

/// Default number of herald pattern slots.
pub const DEFAULT_NUM_PATTERNS: usize = 4;
