//! Herald pattern set and matcher.
//!
//! # Register payload
//!
//! ```text
//! bit:  H*I+H-1 .. H*I      H*I-1 .. (H-1)*I   ...   I-1 .. 0
//!       enable[H-1..0]      pattern[H-1]       ...   pattern[0]
//! ```
//!
//! `I` = number of inputs (pattern width), `H` = number of slots.
//! Matching is exact bitwise equality against the enabled slots.

use std::fmt;

/// One pattern slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeraldPattern {
    /// I-bit input pattern, bit i = input i.
    pub pattern: u32,
    /// Disabled slots never match.
    pub enabled: bool,
}

/// Ordered list of pattern slots, replaced wholesale on each write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeraldSet {
    width: usize,
    slots: Vec<HeraldPattern>,
}

impl HeraldSet {
    /// All slots disabled.
    pub fn new(num_inputs: usize, num_patterns: usize) -> Self {
        Self {
            width: num_inputs,
            slots: vec![HeraldPattern::default(); num_patterns],
        }
    }

    /// Enable the first `patterns.len()` slots with the given patterns.
    ///
    /// Extra patterns beyond the slot count are ignored.
    pub fn with_patterns(num_inputs: usize, num_patterns: usize, patterns: &[u32]) -> Self {
        let mut set = Self::new(num_inputs, num_patterns);
        let mask = set.pattern_mask();
        for (slot, &pattern) in set.slots.iter_mut().zip(patterns) {
            slot.pattern = pattern & mask;
            slot.enabled = true;
        }
        set
    }

    /// Unpack a register payload.
    pub fn from_word(word: u32, num_inputs: usize, num_patterns: usize) -> Self {
        let mut set = Self::new(num_inputs, num_patterns);
        let mask = set.pattern_mask();
        let enable_base = num_patterns * num_inputs;
        for (i, slot) in set.slots.iter_mut().enumerate() {
            slot.pattern = (word >> (i * num_inputs)) & mask;
            slot.enabled = (word >> (enable_base + i)) & 1 == 1;
        }
        set
    }

    /// Pack into a register payload.
    pub fn to_word(&self) -> u32 {
        let enable_base = self.slots.len() * self.width;
        self.slots.iter().enumerate().fold(0u32, |word, (i, slot)| {
            let mut word = word | (slot.pattern & self.pattern_mask()) << (i * self.width);
            if slot.enabled {
                word |= 1 << (enable_base + i);
            }
            word
        })
    }

    /// Pattern width in bits.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn slots(&self) -> &[HeraldPattern] {
        &self.slots
    }

    /// Mask covering one pattern.
    pub fn pattern_mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1 << self.width) - 1
        }
    }

    /// One bit per slot that is enabled and equals `sample`.
    pub fn matches(&self, sample: u32) -> u32 {
        let sample = sample & self.pattern_mask();
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.enabled && slot.pattern == sample)
            .fold(0, |acc, (i, _)| acc | 1 << i)
    }

    /// Whether any enabled slot equals `sample`.
    pub fn is_match(&self, sample: u32) -> bool {
        self.matches(sample) != 0
    }

    /// Whether any slot is enabled.
    pub fn any_enabled(&self) -> bool {
        self.slots.iter().any(|s| s.enabled)
    }
}

impl fmt::Display for HeraldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled: Vec<String> = self
            .slots
            .iter()
            .filter(|s| s.enabled)
            .map(|s| format!("{:0width$b}", s.pattern, width = self.width))
            .collect();
        write!(f, "[{}]", enabled.join(", "))
    }
}

/// Herald matcher owning the active and staged pattern sets.
#[derive(Debug, Clone)]
pub struct HeraldMatcher {
    active: HeraldSet,
    pending: Option<HeraldSet>,
}

impl HeraldMatcher {
    pub fn new(num_inputs: usize, num_patterns: usize) -> Self {
        Self {
            active: HeraldSet::new(num_inputs, num_patterns),
            pending: None,
        }
    }

    /// Stage a new pattern set for the next cycle boundary.
    pub fn set_patterns(&mut self, set: HeraldSet) {
        self.pending = Some(set);
    }

    /// Most recently written pattern set.
    pub fn patterns(&self) -> &HeraldSet {
        self.pending.as_ref().unwrap_or(&self.active)
    }

    /// Pattern set in effect for the current cycle.
    pub fn active(&self) -> &HeraldSet {
        &self.active
    }

    /// Cycle boundary: promote the staged set.
    pub fn begin_cycle(&mut self) {
        if let Some(set) = self.pending.take() {
            self.active = set;
        }
    }

    /// Evaluate the sampled input vector.
    pub fn is_match(&self, sample: u32) -> bool {
        self.active.is_match(sample)
    }
}
