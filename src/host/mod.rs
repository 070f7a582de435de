//! Host-side driver.
//!
//! [`Entangler`] speaks the register protocol of one core over any
//! [`RegisterBus`]: it converts machine-unit times to register values, packs
//! the herald word and decodes status reads. It follows the host contract of
//! the core:
//!
//! 1. `set_config(false, ..)` before touching cycle length, timings or heralds
//! 2. write those values
//! 3. `set_config(true, ..)`
//! 4. `run_mu(..)` once per attempt, then read counters and timestamps
//!
//! Machine units (mu) are the fine resolution of the timestamp counter, eight
//! per coarse tick.

use thiserror::Error;

use crate::device::core_spec::{FINE_BITS, TIMESTAMP_MASK};
use crate::device::{
    ChannelId, ConfigWord, CoreLayout, HeraldSet, RegisterAddress, RegisterError, SpecialRegister,
    StatusWord, TimingWord,
};
use crate::emu::{EntanglerCore, LinkMessage, LinkedPair, RunOutcome};

/// Driver errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error(transparent)]
    Register(#[from] RegisterError),
    #[error("Channel {0} does not exist on this core")]
    UnknownChannel(ChannelId),
    #[error("{given} herald patterns given, core has {max} slots")]
    TooManyHeralds { given: usize, max: usize },
    #[error("Run did not start (core disabled?)")]
    NotStarted,
    #[error("Run still in progress after {0} ticks")]
    Stalled(u64),
}

/// Register access to one core.
pub trait RegisterBus {
    /// Layout of the core behind the bus.
    fn bus_layout(&self) -> CoreLayout;

    fn write(&mut self, address: u32, data: u32) -> Result<(), RegisterError>;

    fn read(&mut self, address: u32) -> Result<u32, RegisterError>;
}

/// A bus whose core can be clocked from the host (for blocking calls).
pub trait Clocked {
    /// Advance the simulation by one tick.
    fn tick(&mut self);
}

impl RegisterBus for EntanglerCore {
    fn bus_layout(&self) -> CoreLayout {
        *self.layout()
    }

    fn write(&mut self, address: u32, data: u32) -> Result<(), RegisterError> {
        self.write_register(address, data)
    }

    fn read(&mut self, address: u32) -> Result<u32, RegisterError> {
        self.read_register(address)
    }
}

impl Clocked for EntanglerCore {
    fn tick(&mut self) {
        self.step(LinkMessage::EMPTY);
    }
}

/// Which core of a linked pair a bus talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSide {
    Master,
    Slave,
}

/// Register bus to one side of a [`LinkedPair`]. Ticks clock both cores.
pub struct PairBus<'a> {
    pair: &'a mut LinkedPair,
    side: PairSide,
}

impl<'a> PairBus<'a> {
    pub fn new(pair: &'a mut LinkedPair, side: PairSide) -> Self {
        Self { pair, side }
    }

    fn core(&self) -> &EntanglerCore {
        match self.side {
            PairSide::Master => &self.pair.master,
            PairSide::Slave => &self.pair.slave,
        }
    }

    fn core_mut(&mut self) -> &mut EntanglerCore {
        match self.side {
            PairSide::Master => &mut self.pair.master,
            PairSide::Slave => &mut self.pair.slave,
        }
    }
}

impl RegisterBus for PairBus<'_> {
    fn bus_layout(&self) -> CoreLayout {
        *self.core().layout()
    }

    fn write(&mut self, address: u32, data: u32) -> Result<(), RegisterError> {
        self.core_mut().write_register(address, data)
    }

    fn read(&mut self, address: u32) -> Result<u32, RegisterError> {
        self.core().read_register(address)
    }
}

impl Clocked for PairBus<'_> {
    fn tick(&mut self) {
        self.pair.step();
    }
}

/// Result of a blocking run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// Ticks waited for completion.
    pub ticks: u64,
}

/// Driver for one Entangler core.
pub struct Entangler<B> {
    bus: B,
    layout: CoreLayout,
    is_master: bool,
}

impl<B: RegisterBus> Entangler<B> {
    pub fn new(bus: B, is_master: bool) -> Self {
        let layout = bus.bus_layout();
        Self {
            bus,
            layout,
            is_master,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    fn write_special(&mut self, reg: SpecialRegister, data: u32) -> Result<(), DriverError> {
        let address = RegisterAddress::special(reg).encode(&self.layout);
        self.bus.write(address, data)?;
        Ok(())
    }

    fn read_status(&mut self, reg: SpecialRegister) -> Result<u32, DriverError> {
        let address = RegisterAddress::status(reg).encode(&self.layout);
        Ok(self.bus.read(address)?)
    }

    /// Write the role bit with the core disabled.
    pub fn init(&mut self) -> Result<(), DriverError> {
        self.set_config(false, false)
    }

    /// Write CONFIG. Do not enable before cycle length and timings are set.
    pub fn set_config(&mut self, enable: bool, standalone: bool) -> Result<(), DriverError> {
        let word = ConfigWord {
            enable,
            is_master: self.is_master,
            standalone,
        };
        self.write_special(SpecialRegister::Config, word.to_bits())
    }

    /// Set a channel window in machine units, relative to the cycle start.
    ///
    /// Output times are reduced to coarse ticks. Both ends get a one-unit
    /// offset so that a zero time is representable, then are truncated to the
    /// timestamp width.
    pub fn set_timing_mu(&mut self, channel: ChannelId, start_mu: u32, stop_mu: u32) -> Result<(), DriverError> {
        let address = RegisterAddress::timing(&self.layout, channel)
            .ok_or(DriverError::UnknownChannel(channel))?
            .encode(&self.layout);
        let (mut start, mut stop) = (start_mu, stop_mu);
        if let ChannelId::Output(_) = channel {
            start >>= FINE_BITS;
            stop >>= FINE_BITS;
        }
        let word = TimingWord {
            start: (start.wrapping_add(1) & TIMESTAMP_MASK) as u16,
            stop: (stop.wrapping_add(1) & TIMESTAMP_MASK) as u16,
        };
        self.bus.write(address, word.to_bits())?;
        Ok(())
    }

    /// Set the cycle length in machine units (coarse resolution).
    pub fn set_cycle_length_mu(&mut self, cycle_mu: u32) -> Result<(), DriverError> {
        self.write_special(SpecialRegister::CycleLength, cycle_mu >> FINE_BITS)
    }

    /// Set the herald patterns, bit i = input i. Unused slots are disabled.
    pub fn set_heralds(&mut self, patterns: &[u32]) -> Result<(), DriverError> {
        if patterns.len() > self.layout.num_patterns {
            return Err(DriverError::TooManyHeralds {
                given: patterns.len(),
                max: self.layout.num_patterns,
            });
        }
        let set = HeraldSet::with_patterns(self.layout.num_inputs, self.layout.num_patterns, patterns);
        self.write_special(SpecialRegister::Heralds, set.to_word())
    }

    /// Arm a run with a timeout in machine units. Does not wait.
    pub fn start_mu(&mut self, duration_mu: u32) -> Result<(), DriverError> {
        self.write_special(SpecialRegister::Run, duration_mu >> FINE_BITS)
    }

    pub fn status(&mut self) -> Result<StatusWord, DriverError> {
        Ok(StatusWord::from_bits(self.read_status(SpecialRegister::Config)?))
    }

    /// Completed cycles of the last run.
    pub fn ncycles(&mut self) -> Result<u32, DriverError> {
        self.read_status(SpecialRegister::Run)
    }

    /// Coarse ticks left before timeout.
    pub fn time_remaining(&mut self) -> Result<u32, DriverError> {
        self.read_status(SpecialRegister::CycleLength)
    }

    /// Reference triggers of the last run.
    pub fn ntriggers(&mut self) -> Result<u32, DriverError> {
        self.read_status(SpecialRegister::Heralds)
    }

    /// Latched timestamp of a channel in machine units (0: no edge).
    pub fn timestamp_mu(&mut self, channel: ChannelId) -> Result<u32, DriverError> {
        let address = RegisterAddress::timestamp(&self.layout, channel)
            .ok_or(DriverError::UnknownChannel(channel))?
            .encode(&self.layout);
        Ok(self.bus.read(address)?)
    }

    /// Input pattern of the last cycle, rebuilt from non-zero timestamps.
    ///
    /// An edge latched at time 0 reads as "no edge" and is missed.
    pub fn pattern(&mut self) -> Result<u32, DriverError> {
        let mut pattern = 0;
        for i in 0..self.layout.num_inputs {
            if self.timestamp_mu(ChannelId::Input(i))? > 0 {
                pattern |= 1 << i;
            }
        }
        Ok(pattern)
    }
}

impl<B: RegisterBus + Clocked> Entangler<B> {
    /// Run until success or timeout. Blocks for at most `max_ticks` ticks.
    pub fn run_mu(&mut self, duration_mu: u32, max_ticks: u64) -> Result<RunResult, DriverError> {
        self.start_mu(duration_mu)?;
        if !self.status()?.running {
            return Err(DriverError::NotStarted);
        }
        log::debug!("Waiting for run to finish (up to {} ticks)", max_ticks);

        for ticks in 1..=max_ticks {
            self.bus.tick();
            let status = self.status()?;
            if status.running {
                continue;
            }
            let outcome = if status.success {
                RunOutcome::Success
            } else if status.timed_out {
                RunOutcome::TimedOut
            } else {
                // Disabled mid-run
                return Err(DriverError::NotStarted);
            };
            return Ok(RunResult { outcome, ticks });
        }
        Err(DriverError::Stalled(max_ticks))
    }
}
