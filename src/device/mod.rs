//! Device model of the Entangler gateware.
//!
//! This module provides:
//! - Specification constants (timestamp format, counter widths)
//! - The core layout (channel index space, address widths)
//! - Per-channel pulse and gate units
//! - The herald pattern matcher
//! - Register address decoding and packed word formats
//!
//! # Architecture Overview
//!
//! ```text
//!              +-------------------------------------------+
//!  register -->| address decoder (control, selector)       |
//!   bus        +------+-------------+-------------+--------+
//!                     |             |             |
//!              +------v-----+ +-----v------+ +----v-------+
//!              | pulse units| | gate units | | heralds    |
//!              | out0..outN | | in0..inN   | | H patterns |
//!              +------+-----+ +-----+------+ +----+-------+
//!                     |             | triggered   |
//!                     v             +-------------> match
//!                output lines
//! ```
//!
//! The cycle sequencer that drives these units lives in [`crate::emu`].
//!
//! # Example
//!
//! ```
//! use entangler_sim::device::{CoreLayout, ChannelId, RegisterAddress, Control};
//!
//! let layout = CoreLayout::default();
//! assert_eq!(layout.selector_bits(), 3);
//!
//! let addr = RegisterAddress::decode(0b01_100, &layout).unwrap();
//! assert_eq!(addr.control, Control::Timing);
//! assert_eq!(addr.channel(&layout).unwrap(), ChannelId::Input(0));
//! ```

pub mod core_spec;
pub mod layout;
pub mod channel;
pub mod herald;
pub mod registers;

pub use layout::{ChannelId, ConfigError, CoreLayout, GatingMode};
pub use channel::{GateUnit, PulseUnit, Timestamp, TimingWindow};
pub use herald::{HeraldMatcher, HeraldPattern, HeraldSet};
pub use registers::{
    format_address, register_name, ConfigWord, Control, RegisterAddress, RegisterError,
    SpecialRegister, StatusWord, TimingWord,
};
