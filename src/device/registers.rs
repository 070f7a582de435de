//! Entangler register address decoder and word formats.
//!
//! # Address Encoding
//!
//! ```text
//! address: [control:2][selector:S]
//!
//! S = CoreLayout::selector_bits()   (3 for the default 4-out/4-in core)
//!
//! control  space                  direction
//!   00     special registers      write
//!   01     channel timing window  write
//!   10     special registers      read
//!   11     channel timestamp      read
//! ```
//!
//! # Special registers
//!
//! | sel | write         | read            |
//! |-----|---------------|-----------------|
//! | 0   | CONFIG        | STATUS          |
//! | 1   | RUN (timeout) | NCYCLES         |
//! | 2   | CYCLE_LENGTH  | TIME_REMAINING  |
//! | 3   | HERALDS       | NTRIGGERS       |
//!
//! Timing writes and timestamp reads are separate address spaces: reading
//! `11:sel` returns the latched timestamp, never the window written to
//! `01:sel`.

use std::fmt;

use thiserror::Error;

use super::channel::TimingWindow;
use super::core_spec::{CONTROL_BITS, TIMESTAMP_MASK, TIMING_STOP_SHIFT};
use super::layout::{ChannelId, CoreLayout};

/// Register decoding errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Address 0x{address:X} exceeds {bits}-bit register address space")]
    AddressOutOfRange { address: u32, bits: u32 },
    #[error("No special register at selector {0}")]
    UnknownSpecial(u16),
    #[error("Channel selector {selector} out of range ({count} channels)")]
    ChannelOutOfRange { selector: u16, count: usize },
    #[error("Register {0} is write-only")]
    WriteOnly(RegisterAddress),
    #[error("Register {0} is read-only")]
    ReadOnly(RegisterAddress),
}

/// Address space selected by the control bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// `00`: special register write.
    Special,
    /// `01`: channel timing window write.
    Timing,
    /// `10`: special register (status) read.
    Status,
    /// `11`: channel timestamp read.
    Timestamp,
}

impl Control {
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => Control::Special,
            0b01 => Control::Timing,
            0b10 => Control::Status,
            _ => Control::Timestamp,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Control::Special => 0b00,
            Control::Timing => 0b01,
            Control::Status => 0b10,
            Control::Timestamp => 0b11,
        }
    }

    /// Reads are the upper half of the control space.
    pub fn is_read(self) -> bool {
        matches!(self, Control::Status | Control::Timestamp)
    }
}

/// A decoded register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterAddress {
    pub control: Control,
    pub selector: u16,
}

impl RegisterAddress {
    pub fn new(control: Control, selector: u16) -> Self {
        Self { control, selector }
    }

    /// Decode a raw bus address.
    pub fn decode(address: u32, layout: &CoreLayout) -> Result<Self, RegisterError> {
        let sel_bits = layout.selector_bits();
        let bits = sel_bits + CONTROL_BITS;
        if address >> bits != 0 {
            return Err(RegisterError::AddressOutOfRange { address, bits });
        }
        Ok(Self {
            control: Control::from_bits(address >> sel_bits),
            selector: (address & ((1 << sel_bits) - 1)) as u16,
        })
    }

    /// Encode for a bus write/read.
    pub fn encode(self, layout: &CoreLayout) -> u32 {
        let sel_bits = layout.selector_bits();
        (self.control.bits() << sel_bits) | (self.selector as u32 & ((1 << sel_bits) - 1))
    }

    /// Special register write address.
    pub fn special(reg: SpecialRegister) -> Self {
        Self::new(Control::Special, reg.selector())
    }

    /// Special register read address.
    pub fn status(reg: SpecialRegister) -> Self {
        Self::new(Control::Status, reg.selector())
    }

    /// Channel timing window write address.
    pub fn timing(layout: &CoreLayout, channel: ChannelId) -> Option<Self> {
        layout
            .index_of(channel)
            .map(|i| Self::new(Control::Timing, i as u16))
    }

    /// Channel timestamp read address.
    pub fn timestamp(layout: &CoreLayout, channel: ChannelId) -> Option<Self> {
        layout
            .index_of(channel)
            .map(|i| Self::new(Control::Timestamp, i as u16))
    }

    /// Resolve the special register of a `00`/`10` address.
    pub fn special_register(&self) -> Result<SpecialRegister, RegisterError> {
        SpecialRegister::from_selector(self.selector)
            .ok_or(RegisterError::UnknownSpecial(self.selector))
    }

    /// Resolve the channel of a `01`/`11` address.
    pub fn channel(&self, layout: &CoreLayout) -> Result<ChannelId, RegisterError> {
        layout
            .channel_at(self.selector as usize)
            .ok_or(RegisterError::ChannelOutOfRange {
                selector: self.selector,
                count: layout.channel_count(),
            })
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02b}:{}", self.control.bits(), self.selector)
    }
}

/// The four special registers (`control = 00` write, `10` read).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialRegister {
    /// Write CONFIG / read STATUS.
    Config,
    /// Write RUN (timeout) / read NCYCLES.
    Run,
    /// Write CYCLE_LENGTH / read TIME_REMAINING.
    CycleLength,
    /// Write HERALDS / read NTRIGGERS.
    Heralds,
}

impl SpecialRegister {
    pub fn from_selector(selector: u16) -> Option<Self> {
        match selector {
            0 => Some(SpecialRegister::Config),
            1 => Some(SpecialRegister::Run),
            2 => Some(SpecialRegister::CycleLength),
            3 => Some(SpecialRegister::Heralds),
            _ => None,
        }
    }

    pub fn selector(self) -> u16 {
        match self {
            SpecialRegister::Config => 0,
            SpecialRegister::Run => 1,
            SpecialRegister::CycleLength => 2,
            SpecialRegister::Heralds => 3,
        }
    }

    pub fn write_name(self) -> &'static str {
        match self {
            SpecialRegister::Config => "CONFIG",
            SpecialRegister::Run => "RUN",
            SpecialRegister::CycleLength => "CYCLE_LENGTH",
            SpecialRegister::Heralds => "HERALDS",
        }
    }

    pub fn read_name(self) -> &'static str {
        match self {
            SpecialRegister::Config => "STATUS",
            SpecialRegister::Run => "NCYCLES",
            SpecialRegister::CycleLength => "TIME_REMAINING",
            SpecialRegister::Heralds => "NTRIGGERS",
        }
    }
}

/// CONFIG payload: `[standalone, is_master, enable]` (MSB to LSB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigWord {
    pub enable: bool,
    pub is_master: bool,
    pub standalone: bool,
}

impl ConfigWord {
    pub fn from_bits(data: u32) -> Self {
        Self {
            enable: data & 0b001 != 0,
            is_master: data & 0b010 != 0,
            standalone: data & 0b100 != 0,
        }
    }

    pub fn to_bits(self) -> u32 {
        u32::from(self.enable) | u32::from(self.is_master) << 1 | u32::from(self.standalone) << 2
    }
}

/// STATUS payload: `[timed_out, success, running]` (MSB to LSB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusWord {
    pub running: bool,
    pub success: bool,
    pub timed_out: bool,
}

impl StatusWord {
    pub fn from_bits(data: u32) -> Self {
        Self {
            running: data & 0b001 != 0,
            success: data & 0b010 != 0,
            timed_out: data & 0b100 != 0,
        }
    }

    pub fn to_bits(self) -> u32 {
        u32::from(self.running) | u32::from(self.success) << 1 | u32::from(self.timed_out) << 2
    }
}

/// Channel timing payload: `{stop:14 padded to 16, start:14 padded to 16}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimingWord {
    pub start: u16,
    pub stop: u16,
}

impl TimingWord {
    /// Unpack; each field is truncated to 14 bits.
    pub fn from_bits(data: u32) -> Self {
        Self {
            start: (data & TIMESTAMP_MASK) as u16,
            stop: ((data >> TIMING_STOP_SHIFT) & TIMESTAMP_MASK) as u16,
        }
    }

    pub fn to_bits(self) -> u32 {
        (self.stop as u32 & TIMESTAMP_MASK) << TIMING_STOP_SHIFT | (self.start as u32 & TIMESTAMP_MASK)
    }

    pub fn window(self) -> TimingWindow {
        TimingWindow::new(self.start as u32, self.stop as u32)
    }
}

impl From<TimingWindow> for TimingWord {
    fn from(w: TimingWindow) -> Self {
        Self { start: w.start, stop: w.stop }
    }
}

/// Human-readable register name for an address.
pub fn register_name(address: RegisterAddress, layout: &CoreLayout) -> String {
    match address.control {
        Control::Special | Control::Status => match address.special_register() {
            Ok(reg) if address.control == Control::Special => reg.write_name().to_string(),
            Ok(reg) => reg.read_name().to_string(),
            Err(_) => format!("SPECIAL[{}]?", address.selector),
        },
        Control::Timing => match address.channel(layout) {
            Ok(ch) => format!("TIMING[{}]", ch),
            Err(_) => format!("TIMING[{}]?", address.selector),
        },
        Control::Timestamp => match address.channel(layout) {
            Ok(ch) => format!("TIMESTAMP[{}]", ch),
            Err(_) => format!("TIMESTAMP[{}]?", address.selector),
        },
    }
}

/// Format a raw bus address for display.
pub fn format_address(address: u32, layout: &CoreLayout) -> String {
    match RegisterAddress::decode(address, layout) {
        Ok(decoded) => format!("0x{:02X} {} ({})", address, register_name(decoded, layout), decoded),
        Err(_) => format!("0x{:02X} [invalid]", address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_default_layout() {
        let layout = CoreLayout::default();
        // 5-bit addresses: [control:2][sel:3]
        let addr = RegisterAddress::decode(0b01_101, &layout).unwrap();
        assert_eq!(addr.control, Control::Timing);
        assert_eq!(addr.selector, 5);
        assert_eq!(addr.channel(&layout).unwrap(), ChannelId::Input(1));

        let addr = RegisterAddress::decode(0b11_000, &layout).unwrap();
        assert_eq!(addr.control, Control::Timestamp);
        assert_eq!(addr.encode(&layout), 0b11_000);
    }

    #[test]
    fn test_decode_out_of_range() {
        let layout = CoreLayout::default();
        assert_eq!(
            RegisterAddress::decode(0b100_000, &layout),
            Err(RegisterError::AddressOutOfRange { address: 0b100_000, bits: 5 })
        );
    }

    #[test]
    fn test_channel_selector_out_of_range() {
        // 2 outputs + 3 inputs: 3 selector bits, indexes 5..7 unused
        let layout = CoreLayout::new(2, 3, 1);
        let addr = RegisterAddress::decode(0b11_110, &layout).unwrap();
        assert_eq!(
            addr.channel(&layout),
            Err(RegisterError::ChannelOutOfRange { selector: 6, count: 5 })
        );
    }

    #[test]
    fn test_reference_timestamp_address() {
        let layout = CoreLayout::default().with_reference();
        let addr = RegisterAddress::timestamp(&layout, ChannelId::Reference).unwrap();
        assert_eq!(addr.selector, 8);
        assert_eq!(addr.encode(&layout), 0b11_1000);

        let no_ref = CoreLayout::default();
        assert!(RegisterAddress::timestamp(&no_ref, ChannelId::Reference).is_none());
    }

    #[test]
    fn test_special_registers() {
        let addr = RegisterAddress::special(SpecialRegister::Heralds);
        assert_eq!(addr.special_register().unwrap(), SpecialRegister::Heralds);
        assert_eq!(
            RegisterAddress::new(Control::Special, 4).special_register(),
            Err(RegisterError::UnknownSpecial(4))
        );
    }

    #[test]
    fn test_config_word() {
        let word = ConfigWord { enable: true, is_master: false, standalone: true };
        assert_eq!(word.to_bits(), 0b101);
        assert_eq!(ConfigWord::from_bits(0b011), ConfigWord { enable: true, is_master: true, standalone: false });
    }

    #[test]
    fn test_status_word() {
        let status = StatusWord::from_bits(0b110);
        assert!(!status.running);
        assert!(status.success);
        assert!(status.timed_out);
        assert_eq!(status.to_bits(), 0b110);
    }

    #[test]
    fn test_timing_word_masks_fields() {
        let word = TimingWord::from_bits(0xFFFF_FFFF);
        assert_eq!(word.start, 0x3FFF);
        assert_eq!(word.stop, 0x3FFF);

        let word = TimingWord { start: 10, stop: 20 };
        assert_eq!(word.to_bits(), (20 << 16) | 10);
        assert_eq!(word.window(), TimingWindow::new(10, 20));
    }

    #[test]
    fn test_format_address() {
        let layout = CoreLayout::default();
        assert!(format_address(0b00_001, &layout).contains("RUN"));
        assert!(format_address(0b10_001, &layout).contains("NCYCLES"));
        assert!(format_address(0b01_010, &layout).contains("TIMING[out2]"));
        assert!(format_address(0b11_100, &layout).contains("TIMESTAMP[in0]"));
        assert!(format_address(0xFF, &layout).contains("invalid"));
    }
}
