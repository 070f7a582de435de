//! Core layout: channel index space and register address widths.
//!
//! A [`CoreLayout`] is fixed when a core is built. It decides how many pulse
//! and gate units exist, whether a reference unit and the master/slave link
//! are wired, and derives the register address format from those counts.
//!
//! # Channel order
//!
//! ```text
//! index:  0 .. O-1      O .. O+I-1     O+I
//!         outputs       inputs         reference (optional)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::core_spec;

/// How input gate windows are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatingMode {
    /// Windows are relative to the start of the cycle.
    #[default]
    Cycle,
    /// Windows are relative to the reference edge of the current cycle.
    Reference,
}

/// Invalid core layout.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Core needs at least one input signal")]
    NoInputs,
    #[error("Core needs at least one herald pattern slot")]
    NoPatterns,
    #[error("Herald word needs {bits} bits, data word has {max}")]
    HeraldWordTooWide { bits: u32, max: u32 },
    #[error("Reference gating requires a reference input")]
    ReferenceGatingWithoutReference,
}

/// A channel in the fixed index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Output line driven by a pulse unit.
    Output(usize),
    /// Input line watched by a gate unit.
    Input(usize),
    /// Reference input line.
    Reference,
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Output(i) => write!(f, "out{}", i),
            ChannelId::Input(i) => write!(f, "in{}", i),
            ChannelId::Reference => write!(f, "ref"),
        }
    }
}

impl FromStr for ChannelId {
    type Err = String;

    /// Parse the display form: `out<i>`, `in<i>` or `ref`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let index = |rest: &str| {
            rest.parse::<usize>()
                .map_err(|_| format!("Invalid channel '{}' (expected outN, inN or ref)", s))
        };
        if s == "ref" {
            Ok(ChannelId::Reference)
        } else if let Some(rest) = s.strip_prefix("out") {
            index(rest).map(ChannelId::Output)
        } else if let Some(rest) = s.strip_prefix("in") {
            index(rest).map(ChannelId::Input)
        } else {
            Err(format!("Invalid channel '{}' (expected outN, inN or ref)", s))
        }
    }
}

/// Build-time layout of one Entangler core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreLayout {
    /// Number of output channels.
    pub num_outputs: usize,
    /// Number of gated input signals (herald pattern width).
    pub num_inputs: usize,
    /// Number of herald pattern slots.
    pub num_patterns: usize,
    /// Reference input wired in.
    pub has_reference: bool,
    /// Master/slave link pins wired in.
    pub core_link: bool,
    /// Gate window reference point.
    pub gating: GatingMode,
}

impl Default for CoreLayout {
    fn default() -> Self {
        Self {
            num_outputs: core_spec::DEFAULT_NUM_OUTPUTS,
            num_inputs: core_spec::DEFAULT_NUM_INPUTS,
            num_patterns: core_spec::DEFAULT_NUM_PATTERNS,
            has_reference: false,
            core_link: true,
            gating: GatingMode::Cycle,
        }
    }
}

impl CoreLayout {
    /// Create a layout with the given counts, no reference, link wired.
    pub fn new(num_outputs: usize, num_inputs: usize, num_patterns: usize) -> Self {
        Self {
            num_outputs,
            num_inputs,
            num_patterns,
            ..Self::default()
        }
    }

    /// Add a reference input.
    pub fn with_reference(mut self) -> Self {
        self.has_reference = true;
        self
    }

    /// Build without the inter-core link pins.
    pub fn without_link(mut self) -> Self {
        self.core_link = false;
        self
    }

    /// Select the gating mode.
    pub fn with_gating(mut self, gating: GatingMode) -> Self {
        self.gating = gating;
        self
    }

    /// Check the layout can be built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_inputs == 0 {
            return Err(ConfigError::NoInputs);
        }
        if self.num_patterns == 0 {
            return Err(ConfigError::NoPatterns);
        }
        let bits = self.herald_word_bits();
        if bits > core_spec::DATA_WIDTH {
            return Err(ConfigError::HeraldWordTooWide {
                bits,
                max: core_spec::DATA_WIDTH,
            });
        }
        if self.gating == GatingMode::Reference && !self.has_reference {
            return Err(ConfigError::ReferenceGatingWithoutReference);
        }
        Ok(())
    }

    /// Size of the channel index space.
    pub fn channel_count(&self) -> usize {
        self.num_outputs + self.num_inputs + usize::from(self.has_reference)
    }

    /// Selector width of a register address.
    ///
    /// `ceil(log2(outputs + inputs))`, widened when the reference index does
    /// not fit, and never below two bits.
    pub fn selector_bits(&self) -> u32 {
        let bits = ceil_log2(self.num_outputs + self.num_inputs);
        let bits = bits.max(ceil_log2(self.channel_count()));
        bits.max(core_spec::MIN_SELECTOR_BITS)
    }

    /// Total register address width (control + selector).
    pub fn address_bits(&self) -> u32 {
        self.selector_bits() + core_spec::CONTROL_BITS
    }

    /// Width of the packed herald register payload.
    pub fn herald_word_bits(&self) -> u32 {
        (self.num_patterns + self.num_patterns * self.num_inputs) as u32
    }

    /// Channel at an index of the fixed order.
    pub fn channel_at(&self, index: usize) -> Option<ChannelId> {
        if index < self.num_outputs {
            Some(ChannelId::Output(index))
        } else if index < self.num_outputs + self.num_inputs {
            Some(ChannelId::Input(index - self.num_outputs))
        } else if self.has_reference && index == self.num_outputs + self.num_inputs {
            Some(ChannelId::Reference)
        } else {
            None
        }
    }

    /// Index of a channel in the fixed order.
    pub fn index_of(&self, channel: ChannelId) -> Option<usize> {
        match channel {
            ChannelId::Output(i) if i < self.num_outputs => Some(i),
            ChannelId::Input(i) if i < self.num_inputs => Some(self.num_outputs + i),
            ChannelId::Reference if self.has_reference => {
                Some(self.num_outputs + self.num_inputs)
            }
            _ => None,
        }
    }

    /// All channels in index order.
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        (0..self.channel_count()).filter_map(move |i| self.channel_at(i))
    }
}

impl fmt::Display for CoreLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} out / {} in / {} heralds{}{}",
            self.num_outputs,
            self.num_inputs,
            self.num_patterns,
            if self.has_reference { " + ref" } else { "" },
            if self.core_link { "" } else { " (unlinked)" },
        )
    }
}

/// Number of bits needed to index `count` items.
fn ceil_log2(count: usize) -> u32 {
    if count <= 1 {
        0
    } else {
        usize::BITS - (count - 1).leading_zeros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn test_default_address_format() {
        let layout = CoreLayout::default();
        assert_eq!(layout.channel_count(), 8);
        assert_eq!(layout.selector_bits(), 3);
        assert_eq!(layout.address_bits(), 5);
        assert_eq!(layout.herald_word_bits(), 20);
    }

    #[test]
    fn test_reference_widens_selector() {
        let layout = CoreLayout::default().with_reference();
        assert_eq!(layout.channel_count(), 9);
        assert_eq!(layout.selector_bits(), 4);

        // 3 + 4 channels + ref = 8 still fits in three bits
        let layout = CoreLayout::new(3, 4, 2).with_reference();
        assert_eq!(layout.selector_bits(), 3);
    }

    #[test]
    fn test_small_layout_keeps_special_registers_addressable() {
        let layout = CoreLayout::new(1, 1, 1);
        assert_eq!(layout.selector_bits(), 2);
    }

    #[test]
    fn test_channel_order() {
        let layout = CoreLayout::new(2, 3, 1).with_reference();
        let channels: Vec<_> = layout.channels().collect();
        assert_eq!(
            channels,
            vec![
                ChannelId::Output(0),
                ChannelId::Output(1),
                ChannelId::Input(0),
                ChannelId::Input(1),
                ChannelId::Input(2),
                ChannelId::Reference,
            ]
        );
        assert_eq!(layout.index_of(ChannelId::Reference), Some(5));
        assert_eq!(layout.index_of(ChannelId::Input(3)), None);
        assert_eq!(layout.channel_at(6), None);
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("out3".parse::<ChannelId>(), Ok(ChannelId::Output(3)));
        assert_eq!("in0".parse::<ChannelId>(), Ok(ChannelId::Input(0)));
        assert_eq!("ref".parse::<ChannelId>(), Ok(ChannelId::Reference));
        assert!("apd0".parse::<ChannelId>().is_err());
        assert!("in".parse::<ChannelId>().is_err());
        for ch in CoreLayout::default().with_reference().channels() {
            assert_eq!(ch.to_string().parse::<ChannelId>(), Ok(ch));
        }
    }

    #[test]
    fn test_reference_absent_not_addressable() {
        let layout = CoreLayout::default();
        assert_eq!(layout.index_of(ChannelId::Reference), None);
        assert_eq!(layout.channel_at(8), None);
    }

    #[test]
    fn test_validate() {
        assert!(CoreLayout::default().validate().is_ok());
        assert_eq!(CoreLayout::new(4, 0, 4).validate(), Err(ConfigError::NoInputs));
        assert_eq!(
            CoreLayout::new(4, 8, 4).validate(),
            Err(ConfigError::HeraldWordTooWide { bits: 36, max: 32 })
        );
        assert_eq!(
            CoreLayout::default().with_gating(GatingMode::Reference).validate(),
            Err(ConfigError::ReferenceGatingWithoutReference)
        );
    }
}
