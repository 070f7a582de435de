//! Cycle sequencer state machine.
//!
//! ```text
//!            Run                start condition
//!   Idle ----------> Armed ----------------------> Running --+
//!    ^                 ^                             |  ^    | m + 1 < cycle_length
//!    | enable = 0      | cycle end (linked)          |  +----+
//!    |                 +-----------------------------+
//!    |                                               | herald / master Success
//!    +--- (any state)                                +-------------> Success
//!                                                    | time_remaining == 0 / master Timeout
//!                                                    +-------------> TimedOut
//! ```
//!
//! A tick is split in two halves so the owning core can evaluate its channel
//! units in between: [`CycleSequencer::begin_tick`] decides whether a cycle
//! tick happens (and whether it starts a new cycle), [`CycleSequencer::end_tick`]
//! applies the herald result, the countdown and the cycle counter.
//!
//! The countdown runs on every tick of a live run, so a linked master left
//! waiting in Armed still times out.

use std::fmt;

use crate::device::core_spec::{COARSE_MASK, CYCLE_COUNT_MASK, TRIGGER_COUNT_MASK};
use crate::device::ConfigWord;

use super::link::{LinkMessage, LinkSignal};

/// Sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencerState {
    /// Disabled or never run.
    #[default]
    Idle,
    /// Run requested, waiting for the start condition.
    Armed,
    /// Cycle in progress.
    Running,
    /// Herald seen (or master reported success).
    Success,
    /// Time ran out (or master reported timeout).
    TimedOut,
}

impl SequencerState {
    /// Armed or running: the run has not ended yet.
    pub fn is_live(self) -> bool {
        matches!(self, SequencerState::Armed | SequencerState::Running)
    }

    /// Terminal outcome, if the run has ended.
    pub fn outcome(self) -> Option<RunOutcome> {
        match self {
            SequencerState::Success => Some(RunOutcome::Success),
            SequencerState::TimedOut => Some(RunOutcome::TimedOut),
            _ => None,
        }
    }
}

impl fmt::Display for SequencerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SequencerState::Idle => "idle",
            SequencerState::Armed => "armed",
            SequencerState::Running => "running",
            SequencerState::Success => "success",
            SequencerState::TimedOut => "timed out",
        };
        write!(f, "{}", s)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    Success,
    TimedOut,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Success => write!(f, "success"),
            RunOutcome::TimedOut => write!(f, "timeout"),
        }
    }
}

/// Effective link role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Free-running, link signals ignored.
    Standalone,
    /// Waits for Ready, drives Trigger/Success/Timeout.
    Master,
    /// Follows the master's Trigger/Success/Timeout, drives Ready.
    Slave,
}

/// Run configuration written through the register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunConfig {
    pub enable: bool,
    pub is_master: bool,
    pub standalone: bool,
    /// Cycle length in coarse ticks.
    pub cycle_length: u16,
    /// Timeout of the last Run write, in coarse ticks.
    pub timeout: u32,
}

/// Counters of the current (or last) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunState {
    /// Completed cycles, wrapping at 14 bits.
    pub cycle_count: u16,
    /// Coarse ticks left before timeout.
    pub time_remaining: u32,
    /// Reference edges latched, wrapping at 14 bits.
    pub trigger_count: u16,
}

/// First half of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickPhase {
    /// No cycle tick: channel units stay quiet.
    Inactive,
    /// A cycle tick at coarse time `m`.
    Active { m: u16, cycle_start: bool },
    /// The run ended without a cycle tick (timed out while armed).
    Finished(RunOutcome),
}

/// Second half of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Cycle continues at `m + 1`.
    Continue,
    /// Cycle completed without herald.
    CycleComplete,
    /// Run ended.
    Finished(RunOutcome),
}

/// The per-core cycle state machine.
#[derive(Debug, Clone)]
pub struct CycleSequencer {
    link_wired: bool,
    config: RunConfig,
    state: SequencerState,
    run: RunState,
    /// Coarse tick of the next cycle tick.
    m: u16,
    /// Master started a cycle this tick.
    triggering: bool,
}

impl CycleSequencer {
    /// Create a sequencer. `link_wired` is the build-time link capability.
    pub fn new(link_wired: bool) -> Self {
        Self {
            link_wired,
            config: RunConfig::default(),
            state: SequencerState::Idle,
            run: RunState::default(),
            m: 0,
            triggering: false,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Coarse tick of the next cycle tick.
    pub fn m(&self) -> u16 {
        self.m
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enable
    }

    /// Role after applying the build-time link capability.
    pub fn role(&self) -> LinkRole {
        if !self.link_wired || self.config.standalone {
            LinkRole::Standalone
        } else if self.config.is_master {
            LinkRole::Master
        } else {
            LinkRole::Slave
        }
    }

    /// Apply a CONFIG write. Disabling aborts any run.
    pub fn configure(&mut self, word: ConfigWord) {
        let was_enabled = self.config.enable;
        self.config.enable = word.enable;
        self.config.is_master = word.is_master;
        self.config.standalone = word.standalone;

        if !word.enable {
            if self.state.is_live() {
                log::info!("Sequencer disabled, aborting {} run", self.state);
            }
            self.state = SequencerState::Idle;
            self.m = 0;
            self.triggering = false;
        } else if !was_enabled {
            log::debug!("Sequencer enabled as {:?}", self.role());
            if self.config.cycle_length == 0 {
                log::warn!("Sequencer enabled with cycle_length = 0: every tick completes a cycle");
            }
        }
    }

    /// Apply a CYCLE_LENGTH write, truncated to the coarse counter width.
    pub fn set_cycle_length(&mut self, cycle_length: u32) {
        let masked = (cycle_length & COARSE_MASK) as u16;
        if masked as u32 != cycle_length {
            log::debug!("Cycle length {} truncated to {}", cycle_length, masked);
        }
        self.config.cycle_length = masked;
    }

    /// Apply a RUN write: reset the counters and arm.
    ///
    /// Returns false (and does nothing) on a disabled sequencer.
    pub fn arm(&mut self, timeout: u32) -> bool {
        if !self.config.enable {
            log::warn!("Run written while disabled, ignored");
            return false;
        }
        if timeout == 0 {
            log::warn!("Run armed with timeout = 0: it will time out on its first tick");
        }
        self.config.timeout = timeout;
        self.run = RunState {
            cycle_count: 0,
            time_remaining: timeout,
            trigger_count: 0,
        };
        self.state = SequencerState::Armed;
        self.m = 0;
        self.triggering = false;
        log::info!(
            "Run armed: timeout {} ticks, cycle length {}, {:?}",
            timeout,
            self.config.cycle_length,
            self.role()
        );
        true
    }

    /// Count one reference edge.
    pub fn record_trigger(&mut self) {
        self.run.trigger_count = (self.run.trigger_count + 1) & TRIGGER_COUNT_MASK as u16;
    }

    /// First half of a tick.
    pub fn begin_tick(&mut self, link: LinkMessage) -> TickPhase {
        self.triggering = false;
        match self.state {
            SequencerState::Idle | SequencerState::TimedOut => TickPhase::Inactive,
            SequencerState::Success => {
                self.run.time_remaining = self.run.time_remaining.saturating_sub(1);
                TickPhase::Inactive
            }
            SequencerState::Armed => {
                let role = self.role();
                if role == LinkRole::Slave && link.contains(LinkSignal::Timeout) {
                    self.finish(RunOutcome::TimedOut);
                    return TickPhase::Finished(RunOutcome::TimedOut);
                }
                let start = match role {
                    LinkRole::Standalone => true,
                    LinkRole::Master => link.contains(LinkSignal::Ready),
                    LinkRole::Slave => link.contains(LinkSignal::Trigger),
                };
                if !start {
                    // The countdown runs while waiting on the peer
                    self.run.time_remaining = self.run.time_remaining.saturating_sub(1);
                    if role == LinkRole::Master && self.run.time_remaining == 0 {
                        self.finish(RunOutcome::TimedOut);
                        return TickPhase::Finished(RunOutcome::TimedOut);
                    }
                    return TickPhase::Inactive;
                }
                self.state = SequencerState::Running;
                self.m = 0;
                self.start_cycle()
            }
            SequencerState::Running if self.m == 0 => self.start_cycle(),
            SequencerState::Running => TickPhase::Active {
                m: self.m,
                cycle_start: false,
            },
        }
    }

    fn start_cycle(&mut self) -> TickPhase {
        self.triggering = self.role() == LinkRole::Master;
        log::trace!("Cycle {} start", self.run.cycle_count);
        TickPhase::Active {
            m: 0,
            cycle_start: true,
        }
    }

    /// Second half of a cycle tick. `herald` is the local matcher result.
    pub fn end_tick(&mut self, herald: bool, link: LinkMessage) -> TickOutcome {
        if self.state != SequencerState::Running {
            return TickOutcome::Continue;
        }
        self.run.time_remaining = self.run.time_remaining.saturating_sub(1);

        let role = self.role();
        let success = match role {
            LinkRole::Slave => link.contains(LinkSignal::Success),
            _ => herald,
        };
        if success {
            self.finish(RunOutcome::Success);
            return TickOutcome::Finished(RunOutcome::Success);
        }

        let cycle_end = self.config.cycle_length == 0 || self.m + 1 >= self.config.cycle_length;
        if cycle_end {
            self.run.cycle_count = (self.run.cycle_count + 1) & CYCLE_COUNT_MASK as u16;
        }

        let timed_out = match role {
            LinkRole::Slave => link.contains(LinkSignal::Timeout),
            _ => self.run.time_remaining == 0,
        };
        if timed_out {
            self.finish(RunOutcome::TimedOut);
            return TickOutcome::Finished(RunOutcome::TimedOut);
        }

        if cycle_end {
            self.m = 0;
            if role != LinkRole::Standalone {
                self.state = SequencerState::Armed;
            }
            return TickOutcome::CycleComplete;
        }
        self.m += 1;
        TickOutcome::Continue
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.state = match outcome {
            RunOutcome::Success => SequencerState::Success,
            RunOutcome::TimedOut => SequencerState::TimedOut,
        };
        log::info!(
            "Run finished: {} after {} cycles, {} ticks remaining",
            outcome,
            self.run.cycle_count,
            self.run.time_remaining
        );
    }

    /// Signals this sequencer drives onto the link after the current tick.
    ///
    /// A master drives Timeout whenever `time_remaining` is zero, including
    /// before its first Run write. A slave armed ahead of its master therefore
    /// times out on its next tick.
    pub fn link_outputs(&self) -> LinkMessage {
        let mut msg = LinkMessage::EMPTY;
        match self.role() {
            LinkRole::Standalone => {}
            LinkRole::Master => {
                msg.set(LinkSignal::Trigger, self.triggering);
                msg.set(LinkSignal::Success, self.state == SequencerState::Success);
                msg.set(LinkSignal::Timeout, self.run.time_remaining == 0);
            }
            LinkRole::Slave => {
                msg.set(LinkSignal::Ready, self.state.is_live());
            }
        }
        msg
    }

    /// Upper bound of upcoming ticks that only advance the clock and the
    /// countdown, assuming no input edges and no register traffic.
    ///
    /// Only standalone runs are skipped; linked roles depend on the peer.
    pub fn quiet_ticks(&self) -> u32 {
        match self.state {
            SequencerState::Idle | SequencerState::TimedOut => u32::MAX,
            SequencerState::Success => u32::MAX,
            SequencerState::Armed => 0,
            SequencerState::Running => {
                if self.role() != LinkRole::Standalone || self.m == 0 || self.config.cycle_length == 0 {
                    return 0;
                }
                // Ticks m .. cycle_length - 2 neither end the cycle nor time out
                let to_cycle_end = (self.config.cycle_length - 1).saturating_sub(self.m) as u32;
                let to_timeout = self.run.time_remaining.saturating_sub(1);
                to_cycle_end.min(to_timeout)
            }
        }
    }

    /// Advance through `ticks` quiet ticks at once.
    pub fn skip_ticks(&mut self, ticks: u32) {
        match self.state {
            SequencerState::Running => {
                debug_assert!(ticks <= self.quiet_ticks());
                self.m += ticks as u16;
                self.run.time_remaining -= ticks;
            }
            SequencerState::Success => {
                self.run.time_remaining = self.run.time_remaining.saturating_sub(ticks);
            }
            _ => {}
        }
        self.triggering = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standalone(cycle_length: u32) -> CycleSequencer {
        let mut seq = CycleSequencer::new(true);
        seq.set_cycle_length(cycle_length);
        seq.configure(ConfigWord { enable: true, is_master: false, standalone: true });
        seq
    }

    fn linked(is_master: bool, cycle_length: u32) -> CycleSequencer {
        let mut seq = CycleSequencer::new(true);
        seq.set_cycle_length(cycle_length);
        seq.configure(ConfigWord { enable: true, is_master, standalone: false });
        seq
    }

    fn tick(seq: &mut CycleSequencer, herald: bool, link: LinkMessage) -> Option<TickOutcome> {
        match seq.begin_tick(link) {
            TickPhase::Active { .. } => Some(seq.end_tick(herald, link)),
            TickPhase::Finished(outcome) => Some(TickOutcome::Finished(outcome)),
            TickPhase::Inactive => None,
        }
    }

    #[test]
    fn test_role_resolution() {
        let mut seq = CycleSequencer::new(true);
        seq.configure(ConfigWord { enable: true, is_master: true, standalone: false });
        assert_eq!(seq.role(), LinkRole::Master);
        seq.configure(ConfigWord { enable: true, is_master: false, standalone: false });
        assert_eq!(seq.role(), LinkRole::Slave);
        seq.configure(ConfigWord { enable: true, is_master: true, standalone: true });
        assert_eq!(seq.role(), LinkRole::Standalone);

        let mut unwired = CycleSequencer::new(false);
        unwired.configure(ConfigWord { enable: true, is_master: false, standalone: false });
        assert_eq!(unwired.role(), LinkRole::Standalone);
    }

    #[test]
    fn test_run_ignored_while_disabled() {
        let mut seq = CycleSequencer::new(true);
        assert!(!seq.arm(100));
        assert_eq!(seq.state(), SequencerState::Idle);
    }

    #[test]
    fn test_standalone_starts_on_first_tick() {
        let mut seq = standalone(10);
        seq.arm(100);
        assert_eq!(seq.state(), SequencerState::Armed);
        assert_eq!(
            seq.begin_tick(LinkMessage::EMPTY),
            TickPhase::Active { m: 0, cycle_start: true }
        );
        assert_eq!(seq.state(), SequencerState::Running);
    }

    #[test]
    fn test_timeout_counts_cycles() {
        let mut seq = standalone(100);
        seq.arm(500);
        let mut ticks = 0;
        loop {
            ticks += 1;
            if let Some(TickOutcome::Finished(outcome)) = tick(&mut seq, false, LinkMessage::EMPTY) {
                assert_eq!(outcome, RunOutcome::TimedOut);
                break;
            }
        }
        assert_eq!(ticks, 500);
        assert_eq!(seq.run_state().cycle_count, 5);
        assert_eq!(seq.run_state().time_remaining, 0);
    }

    #[test]
    fn test_success_not_counted_as_cycle() {
        let mut seq = standalone(10);
        seq.arm(1000);
        for _ in 0..25 {
            tick(&mut seq, false, LinkMessage::EMPTY);
        }
        assert_eq!(seq.run_state().cycle_count, 2);
        assert_eq!(tick(&mut seq, true, LinkMessage::EMPTY), Some(TickOutcome::Finished(RunOutcome::Success)));
        assert_eq!(seq.run_state().cycle_count, 2);
    }

    #[test]
    fn test_time_remaining_keeps_decreasing_after_success() {
        let mut seq = standalone(10);
        seq.arm(50);
        tick(&mut seq, true, LinkMessage::EMPTY);
        assert_eq!(seq.state(), SequencerState::Success);
        assert_eq!(seq.run_state().time_remaining, 49);

        for expected in (0..49).rev() {
            tick(&mut seq, false, LinkMessage::EMPTY);
            assert_eq!(seq.run_state().time_remaining, expected);
        }
        tick(&mut seq, false, LinkMessage::EMPTY);
        assert_eq!(seq.run_state().time_remaining, 0);
        assert_eq!(seq.state(), SequencerState::Success);
    }

    #[test]
    fn test_time_remaining_strictly_decreases_while_running() {
        let mut seq = standalone(7);
        seq.arm(60);
        let mut last = seq.run_state().time_remaining;
        while seq.state() != SequencerState::TimedOut {
            tick(&mut seq, false, LinkMessage::EMPTY);
            assert!(seq.run_state().time_remaining < last);
            last = seq.run_state().time_remaining;
        }
    }

    #[test]
    fn test_cycle_count_wraps_at_14_bits() {
        let mut seq = standalone(1);
        seq.arm(20_000);
        for _ in 0..16_383 {
            tick(&mut seq, false, LinkMessage::EMPTY);
        }
        assert_eq!(seq.run_state().cycle_count, 16_383);
        tick(&mut seq, false, LinkMessage::EMPTY);
        assert_eq!(seq.run_state().cycle_count, 0);
        tick(&mut seq, false, LinkMessage::EMPTY);
        assert_eq!(seq.run_state().cycle_count, 1);
    }

    #[test]
    fn test_zero_timeout_ends_on_first_tick() {
        let mut seq = standalone(10);
        seq.arm(0);
        assert_eq!(
            tick(&mut seq, false, LinkMessage::EMPTY),
            Some(TickOutcome::Finished(RunOutcome::TimedOut))
        );
    }

    #[test]
    fn test_zero_cycle_length_completes_every_tick() {
        let mut seq = standalone(0);
        seq.arm(5);
        for _ in 0..5 {
            tick(&mut seq, false, LinkMessage::EMPTY);
        }
        assert_eq!(seq.state(), SequencerState::TimedOut);
        assert_eq!(seq.run_state().cycle_count, 5);
    }

    #[test]
    fn test_cycle_length_masked() {
        let mut seq = CycleSequencer::new(true);
        seq.set_cycle_length(0x800 | 100);
        assert_eq!(seq.config().cycle_length, 100);
    }

    #[test]
    fn test_disable_aborts() {
        let mut seq = standalone(10);
        seq.arm(100);
        tick(&mut seq, false, LinkMessage::EMPTY);
        seq.configure(ConfigWord { enable: false, is_master: false, standalone: true });
        assert_eq!(seq.state(), SequencerState::Idle);
        assert_eq!(tick(&mut seq, false, LinkMessage::EMPTY), None);
    }

    #[test]
    fn test_master_waits_for_ready() {
        let mut master = linked(true, 4);
        master.arm(100);
        for _ in 0..50 {
            assert_eq!(tick(&mut master, false, LinkMessage::EMPTY), None);
        }
        assert_eq!(master.state(), SequencerState::Armed);
        assert_eq!(master.run_state().time_remaining, 50);

        // One tick of Ready unblocks exactly one cycle
        let ready = LinkMessage::EMPTY.with(LinkSignal::Ready);
        assert_eq!(master.begin_tick(ready), TickPhase::Active { m: 0, cycle_start: true });
        assert!(master.link_outputs().contains(LinkSignal::Trigger));
        master.end_tick(false, ready);
        assert!(!master.link_outputs().contains(LinkSignal::Trigger));
        for _ in 0..3 {
            tick(&mut master, false, LinkMessage::EMPTY);
        }
        assert_eq!(master.run_state().cycle_count, 1);
        assert_eq!(master.state(), SequencerState::Armed);
        assert_eq!(tick(&mut master, false, LinkMessage::EMPTY), None);
        assert_eq!(master.run_state().time_remaining, 45);
    }

    #[test]
    fn test_master_times_out_while_waiting_for_ready() {
        let mut master = linked(true, 4);
        master.arm(10);
        for _ in 0..9 {
            assert_eq!(tick(&mut master, false, LinkMessage::EMPTY), None);
        }
        assert_eq!(master.state(), SequencerState::Armed);
        assert_eq!(master.run_state().time_remaining, 1);
        assert_eq!(
            tick(&mut master, false, LinkMessage::EMPTY),
            Some(TickOutcome::Finished(RunOutcome::TimedOut))
        );
        assert_eq!(master.run_state().time_remaining, 0);
        assert!(master.link_outputs().contains(LinkSignal::Timeout));
    }

    #[test]
    fn test_armed_slave_counts_down_but_waits_for_master_timeout() {
        let mut slave = linked(false, 4);
        slave.arm(3);
        for _ in 0..5 {
            assert_eq!(tick(&mut slave, false, LinkMessage::EMPTY), None);
        }
        assert_eq!(slave.run_state().time_remaining, 0);
        assert_eq!(slave.state(), SequencerState::Armed);

        let timeout = LinkMessage::EMPTY.with(LinkSignal::Timeout);
        assert_eq!(
            tick(&mut slave, false, timeout),
            Some(TickOutcome::Finished(RunOutcome::TimedOut))
        );
    }

    #[test]
    fn test_master_timeout_level_before_arming() {
        let master = linked(true, 4);
        assert_eq!(master.state(), SequencerState::Idle);
        assert!(master.link_outputs().contains(LinkSignal::Timeout));
    }

    #[test]
    fn test_slave_follows_master_signals() {
        let mut slave = linked(false, 10);
        slave.arm(100);
        assert!(slave.link_outputs().contains(LinkSignal::Ready));
        assert_eq!(tick(&mut slave, false, LinkMessage::EMPTY), None);

        let trigger = LinkMessage::EMPTY.with(LinkSignal::Trigger);
        assert_eq!(slave.begin_tick(trigger), TickPhase::Active { m: 0, cycle_start: true });
        // Local herald ignored
        assert_eq!(slave.end_tick(true, trigger), TickOutcome::Continue);

        let success = LinkMessage::EMPTY.with(LinkSignal::Success);
        assert_eq!(tick(&mut slave, false, success), Some(TickOutcome::Finished(RunOutcome::Success)));
        assert!(!slave.link_outputs().contains(LinkSignal::Ready));
    }

    #[test]
    fn test_standalone_ignores_link() {
        let noisy = LinkMessage::EMPTY
            .with(LinkSignal::Ready)
            .with(LinkSignal::Trigger)
            .with(LinkSignal::Success)
            .with(LinkSignal::Timeout);
        let mut quiet = standalone(10);
        let mut loud = standalone(10);
        quiet.arm(95);
        loud.arm(95);
        for _ in 0..120 {
            let a = tick(&mut quiet, false, LinkMessage::EMPTY);
            let b = tick(&mut loud, false, noisy);
            assert_eq!(a, b);
            assert_eq!(quiet.run_state(), loud.run_state());
            assert!(loud.link_outputs().is_empty());
        }
    }

    #[test]
    fn test_quiet_ticks_stop_before_cycle_end_and_timeout() {
        let mut seq = standalone(10);
        seq.arm(1000);
        tick(&mut seq, false, LinkMessage::EMPTY);
        assert_eq!(seq.m(), 1);
        // Ticks 1..=8 are quiet, tick 9 ends the cycle
        assert_eq!(seq.quiet_ticks(), 8);
        seq.skip_ticks(8);
        assert_eq!(seq.m(), 9);
        assert_eq!(seq.run_state().time_remaining, 991);
        assert_eq!(tick(&mut seq, false, LinkMessage::EMPTY), Some(TickOutcome::CycleComplete));

        let mut seq = standalone(100);
        seq.arm(5);
        tick(&mut seq, false, LinkMessage::EMPTY);
        assert_eq!(seq.quiet_ticks(), 3);
    }
}
