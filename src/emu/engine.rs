//! Simulation engine for a single core.
//!
//! The engine owns an [`EntanglerCore`] with nothing on the other end of its
//! link and clocks it, either one tick at a time or by jumping over ticks in
//! which nothing but the clock and the countdown move:
//!
//! - [`SimMode::CycleAccurate`]: every tick is executed.
//! - [`SimMode::EventDriven`]: quiet stretches of a standalone run are skipped
//!   in one step. Latched timestamps, counters and event ticks come out the
//!   same as in cycle-accurate mode.
//!
//! # Usage
//!
//! ```ignore
//! let mut engine = Engine::new(core).with_mode(SimMode::EventDriven);
//! engine.step();           // Execute one tick
//! engine.run(10_000);      // Run for up to 10k ticks
//! ```

use std::fmt;

use super::core::EntanglerCore;
use super::link::LinkMessage;
use super::sequencer::{RunOutcome, SequencerState};

/// How the engine advances time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimMode {
    /// One tick per step.
    #[default]
    CycleAccurate,
    /// Skip ticks that cannot change state.
    EventDriven,
}

impl fmt::Display for SimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimMode::CycleAccurate => write!(f, "cycle-accurate"),
            SimMode::EventDriven => write!(f, "event-driven"),
        }
    }
}

/// Stop before executing coarse tick `m` of cycle `cycle`.
#[derive(Debug, Clone)]
pub struct Breakpoint {
    /// Cycle index (completed cycle count).
    pub cycle: u16,
    /// Coarse tick within the cycle.
    pub m: u16,
    /// Whether this breakpoint is enabled.
    pub enabled: bool,
}

impl Breakpoint {
    pub fn new(cycle: u16, m: u16) -> Self {
        Self {
            cycle,
            m,
            enabled: true,
        }
    }
}

/// Engine execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// No run in progress.
    Idle,
    /// Run in progress.
    Running,
    /// Stopped by the tick limit.
    Paused,
    /// Hit a breakpoint.
    Breakpoint { cycle: u16, m: u16 },
    /// The run ended.
    Finished(RunOutcome),
}

/// Single-core simulation engine.
pub struct Engine {
    /// Core being simulated.
    pub core: EntanglerCore,
    /// Time advance mode.
    pub mode: SimMode,
    /// Breakpoints.
    pub breakpoints: Vec<Breakpoint>,
    /// Current engine status.
    pub status: EngineStatus,
    /// Total ticks executed, skipped ones included.
    pub total_ticks: u64,
    /// Maximum ticks before auto-stop (0 = unlimited).
    pub max_ticks: u64,
    /// Tick at which the last breakpoint fired.
    break_tick: Option<u64>,
}

impl Engine {
    pub fn new(core: EntanglerCore) -> Self {
        Self {
            core,
            mode: SimMode::CycleAccurate,
            breakpoints: Vec::new(),
            status: EngineStatus::Idle,
            total_ticks: 0,
            max_ticks: 0,
            break_tick: None,
        }
    }

    /// Select the time advance mode.
    pub fn with_mode(mut self, mode: SimMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn add_breakpoint(&mut self, cycle: u16, m: u16) {
        self.breakpoints.push(Breakpoint::new(cycle, m));
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    fn check_breakpoints(&self) -> Option<(u16, u16)> {
        if self.break_tick == Some(self.total_ticks) {
            return None;
        }
        let seq = self.core.sequencer();
        if seq.state() != SequencerState::Running {
            return None;
        }
        let cycle = seq.run_state().cycle_count;
        self.breakpoints
            .iter()
            .find(|bp| bp.enabled && bp.cycle == cycle && bp.m == seq.m())
            .map(|bp| (bp.cycle, bp.m))
    }

    /// Ticks until the next breakpoint of the current cycle.
    fn breakpoint_horizon(&self) -> u32 {
        let seq = self.core.sequencer();
        let cycle = seq.run_state().cycle_count;
        self.breakpoints
            .iter()
            .filter(|bp| bp.enabled && bp.cycle == cycle && bp.m >= seq.m())
            .map(|bp| (bp.m - seq.m()) as u32)
            .min()
            .unwrap_or(u32::MAX)
    }

    /// Execute one tick.
    ///
    /// Returns true if the run is still live.
    pub fn step(&mut self) -> bool {
        if self.status == EngineStatus::Paused {
            return false;
        }

        if let Some((cycle, m)) = self.check_breakpoints() {
            log::debug!("Breakpoint at cycle {} tick {}", cycle, m);
            self.status = EngineStatus::Breakpoint { cycle, m };
            self.break_tick = Some(self.total_ticks);
            return false;
        }

        self.core.step(LinkMessage::EMPTY);
        self.total_ticks += 1;
        self.update_status()
    }

    fn update_status(&mut self) -> bool {
        let live = self.core.is_running();
        self.status = if live {
            EngineStatus::Running
        } else {
            match self.core.outcome() {
                Some(outcome) => EngineStatus::Finished(outcome),
                None => EngineStatus::Idle,
            }
        };

        if self.max_ticks > 0 && self.total_ticks >= self.max_ticks {
            self.status = EngineStatus::Paused;
            return false;
        }
        live
    }

    /// Skip quiet ticks, at most `budget`. Returns the number skipped.
    fn fast_forward(&mut self, budget: u64) -> u64 {
        if self.core.sequencer().state() != SequencerState::Running {
            return 0;
        }
        let quiet = self.core.quiet_ticks().min(self.breakpoint_horizon()) as u64;
        let mut skip = quiet.min(budget);
        if self.max_ticks > 0 {
            skip = skip.min(self.max_ticks.saturating_sub(self.total_ticks));
        }
        if skip > 0 {
            log::trace!("Skipping {} quiet ticks at tick {}", skip, self.total_ticks);
            self.core.skip_ticks(skip as u32);
            self.total_ticks += skip;
        }
        skip
    }

    /// Run for up to `max_ticks` ticks.
    ///
    /// Stops early when the run ends or a breakpoint is hit.
    /// Returns the number of ticks actually executed.
    pub fn run(&mut self, max_ticks: u64) -> u64 {
        let start = self.total_ticks;
        let limit = self.total_ticks + max_ticks;

        self.status = EngineStatus::Running;

        while self.total_ticks < limit {
            if self.mode == SimMode::EventDriven {
                self.fast_forward(limit - self.total_ticks);
                if self.total_ticks >= limit {
                    break;
                }
            }
            if !self.step() {
                break;
            }
        }

        self.total_ticks - start
    }

    /// Run until the current run ends, or `max_ticks` elapse.
    pub fn run_until_done(&mut self, max_ticks: u64) -> Option<RunOutcome> {
        self.run(max_ticks);
        self.core.outcome()
    }

    /// Pause execution.
    pub fn pause(&mut self) {
        if self.status == EngineStatus::Running {
            self.status = EngineStatus::Paused;
        }
    }

    /// Resume execution from paused/breakpoint state.
    pub fn resume(&mut self) {
        match self.status {
            EngineStatus::Paused | EngineStatus::Breakpoint { .. } => {
                self.status = EngineStatus::Running;
            }
            _ => {}
        }
    }
}
