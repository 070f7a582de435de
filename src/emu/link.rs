//! Master/slave sync link.
//!
//! Two cores exchange a small fixed set of boolean signals every tick:
//!
//! ```text
//!            Ready            (slave -> master)
//!            ReferenceShare   (slave -> master, only with a shared reference line)
//!  master    Trigger          (master -> slave)    slave
//!            Success          (master -> slave)
//!            Timeout          (master -> slave)
//! ```
//!
//! Each core is an independent actor: it receives one [`LinkMessage`] per
//! tick and produces one. [`LinkedPair`] delivers them. The master steps
//! first with the slave's message of the previous tick; the slave then steps
//! with the master's message of the same tick, so the slave starts and stops
//! on the same tick as its master.

use std::fmt;

use super::core::EntanglerCore;

/// Which way a link signal travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    MasterToSlave,
    SlaveToMaster,
}

/// A link signal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkSignal {
    /// Slave has a live run and can follow a trigger.
    Ready,
    /// Master starts a cycle this tick.
    Trigger,
    /// Master heralded success.
    Success,
    /// Master has no time remaining.
    Timeout,
    /// Slave's shared output line, forwarded to the master.
    ReferenceShare,
}

impl LinkSignal {
    pub const ALL: [LinkSignal; 5] = [
        LinkSignal::Ready,
        LinkSignal::Trigger,
        LinkSignal::Success,
        LinkSignal::Timeout,
        LinkSignal::ReferenceShare,
    ];

    fn bit(self) -> u8 {
        match self {
            LinkSignal::Ready => 1 << 0,
            LinkSignal::Trigger => 1 << 1,
            LinkSignal::Success => 1 << 2,
            LinkSignal::Timeout => 1 << 3,
            LinkSignal::ReferenceShare => 1 << 4,
        }
    }

    pub fn direction(self) -> LinkDirection {
        match self {
            LinkSignal::Ready | LinkSignal::ReferenceShare => LinkDirection::SlaveToMaster,
            LinkSignal::Trigger | LinkSignal::Success | LinkSignal::Timeout => {
                LinkDirection::MasterToSlave
            }
        }
    }
}

/// The set of asserted link signals for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkMessage(u8);

impl LinkMessage {
    /// Nothing asserted.
    pub const EMPTY: LinkMessage = LinkMessage(0);

    /// Message with one signal asserted.
    pub fn with(self, signal: LinkSignal) -> Self {
        Self(self.0 | signal.bit())
    }

    /// Set or clear a signal.
    pub fn set(&mut self, signal: LinkSignal, asserted: bool) {
        if asserted {
            self.0 |= signal.bit();
        } else {
            self.0 &= !signal.bit();
        }
    }

    pub fn contains(self, signal: LinkSignal) -> bool {
        self.0 & signal.bit() != 0
    }

    /// Keep only the signals travelling in `direction`.
    pub fn filter(self, direction: LinkDirection) -> Self {
        LinkSignal::ALL
            .iter()
            .filter(|s| s.direction() == direction && self.contains(**s))
            .fold(Self::EMPTY, |msg, &s| msg.with(s))
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LinkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = LinkSignal::ALL
            .iter()
            .filter(|s| self.contains(**s))
            .map(|s| format!("{:?}", s))
            .collect();
        write!(f, "{{{}}}", names.join(","))
    }
}

/// Two cores wired master -> slave.
pub struct LinkedPair {
    pub master: EntanglerCore,
    pub slave: EntanglerCore,
    /// Slave output of the previous tick, delivered to the master next tick.
    slave_to_master: LinkMessage,
    /// Master output of the last tick.
    master_to_slave: LinkMessage,
    shared_reference: bool,
    ticks: u64,
}

impl LinkedPair {
    /// Link two cores. The reference line is shared only if both cores
    /// were built with a reference input.
    pub fn new(master: EntanglerCore, slave: EntanglerCore) -> Self {
        let shared_reference = master.layout().has_reference && slave.layout().has_reference;
        if !master.layout().core_link || !slave.layout().core_link {
            log::warn!("Linking cores built without link pins; they will run standalone");
        }
        Self {
            master,
            slave,
            slave_to_master: LinkMessage::EMPTY,
            master_to_slave: LinkMessage::EMPTY,
            shared_reference,
            ticks: 0,
        }
    }

    /// Advance both cores by one tick.
    pub fn step(&mut self) {
        let to_master = self.slave_to_master;
        let master_out = self.master.step(to_master).filter(LinkDirection::MasterToSlave);

        let slave_out = self.slave.step(master_out);
        let mut to_master = slave_out.filter(LinkDirection::SlaveToMaster);
        if !self.shared_reference {
            to_master.set(LinkSignal::ReferenceShare, false);
        }

        log::trace!("link tick {}: m->s {} s->m {}", self.ticks, master_out, to_master);
        self.master_to_slave = master_out;
        self.slave_to_master = to_master;
        self.ticks += 1;
    }

    /// Step until both cores have no live run, or `max_ticks` elapse.
    ///
    /// Returns the number of ticks executed.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        let start = self.ticks;
        while self.ticks - start < max_ticks {
            self.step();
            if !self.master.is_running() && !self.slave.is_running() {
                break;
            }
        }
        self.ticks - start
    }

    /// Message the master sent on the last tick.
    pub fn master_signals(&self) -> LinkMessage {
        self.master_to_slave
    }

    /// Message the slave sent on the last tick.
    pub fn slave_signals(&self) -> LinkMessage {
        self.slave_to_master
    }

    pub fn shares_reference(&self) -> bool {
        self.shared_reference
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChannelId, ConfigWord, CoreLayout, HeraldSet, TimingWindow};
    use crate::emu::core::SHARED_OUTPUT;
    use crate::emu::{InputLine, RunOutcome, SequencerState};
    use crate::device::Timestamp;

    fn configured_core(is_master: bool) -> EntanglerCore {
        let layout = CoreLayout::new(1, 1, 1);
        let mut core = EntanglerCore::new(layout).unwrap();
        core.configure(ConfigWord { enable: false, is_master, standalone: false });
        core.set_cycle_length(10);
        core.set_window(ChannelId::Output(0), TimingWindow::new(2, 4)).unwrap();
        core.set_window(ChannelId::Input(0), TimingWindow::new(8, 64)).unwrap();
        core.set_heralds(HeraldSet::with_patterns(1, 1, &[0b1]));
        core.configure(ConfigWord { enable: true, is_master, standalone: false });
        core
    }

    #[test]
    fn test_message_filter() {
        let msg = LinkMessage::EMPTY
            .with(LinkSignal::Ready)
            .with(LinkSignal::Trigger)
            .with(LinkSignal::Timeout);
        let m2s = msg.filter(LinkDirection::MasterToSlave);
        assert!(m2s.contains(LinkSignal::Trigger));
        assert!(m2s.contains(LinkSignal::Timeout));
        assert!(!m2s.contains(LinkSignal::Ready));
        assert_eq!(msg.filter(LinkDirection::SlaveToMaster), LinkMessage::EMPTY.with(LinkSignal::Ready));
    }

    #[test]
    fn test_message_display() {
        let msg = LinkMessage::EMPTY.with(LinkSignal::Success);
        assert_eq!(msg.to_string(), "{Success}");
    }

    #[test]
    fn test_pair_runs_in_lockstep_and_agrees_on_success() {
        let mut pair = LinkedPair::new(configured_core(true), configured_core(false));

        pair.master.arm(100);
        for _ in 0..5 {
            pair.step();
        }
        // Slave not armed yet: master waits
        assert_eq!(pair.master.sequencer().state(), SequencerState::Armed);

        pair.slave.arm(100);
        let mut saw_cycle = false;
        for _ in 0..15 {
            pair.step();
            if pair.master.sequencer().state() == SequencerState::Running {
                saw_cycle = true;
                assert_eq!(pair.master.sequencer().m(), pair.slave.sequencer().m());
            }
        }
        assert!(saw_cycle);

        // Herald on the master only, in cycle 2 at t = 12 (coarse tick 1)
        let cycle = pair.master.run_state().cycle_count + 1;
        pair.master.schedule_mut().in_cycle(InputLine::Input(0), cycle, Timestamp::new(12));
        pair.run_until_idle(100);

        assert_eq!(pair.master.outcome(), Some(RunOutcome::Success));
        assert_eq!(pair.slave.outcome(), Some(RunOutcome::Success));
        assert_eq!(pair.master.run_state().cycle_count, pair.slave.run_state().cycle_count);
    }

    #[test]
    fn test_master_timeout_stops_slave() {
        let mut pair = LinkedPair::new(configured_core(true), configured_core(false));
        pair.master.arm(35);
        pair.slave.arm(1000);
        pair.run_until_idle(200);

        assert_eq!(pair.master.outcome(), Some(RunOutcome::TimedOut));
        assert_eq!(pair.slave.outcome(), Some(RunOutcome::TimedOut));
        assert!(pair.slave.run_state().time_remaining > 0);
    }

    #[test]
    fn test_slave_armed_before_master_times_out() {
        let mut pair = LinkedPair::new(configured_core(true), configured_core(false));
        pair.slave.arm(100);
        pair.step();
        assert_eq!(pair.slave.outcome(), Some(RunOutcome::TimedOut));
    }

    #[test]
    fn test_master_times_out_after_slave_drops_out() {
        let mut pair = LinkedPair::new(configured_core(true), configured_core(false));
        pair.slave.arm(1000);
        pair.master.arm(100);
        for _ in 0..25 {
            pair.step();
        }
        assert_eq!(pair.master.sequencer().state(), SequencerState::Running);

        pair.slave.configure(ConfigWord { enable: false, is_master: false, standalone: false });
        let ticks = pair.run_until_idle(1000);

        assert!(ticks < 100);
        assert_eq!(pair.master.outcome(), Some(RunOutcome::TimedOut));
        assert_eq!(pair.master.run_state().time_remaining, 0);
        assert_eq!(pair.slave.sequencer().state(), SequencerState::Idle);
    }

    #[test]
    fn test_master_waits_while_time_remains() {
        let mut pair = LinkedPair::new(configured_core(true), configured_core(false));
        pair.master.arm(100);
        for _ in 0..99 {
            pair.step();
        }
        assert_eq!(pair.master.sequencer().state(), SequencerState::Armed);
        assert_eq!(pair.master.run_state().time_remaining, 1);
        pair.step();
        assert_eq!(pair.master.outcome(), Some(RunOutcome::TimedOut));
    }

    #[test]
    fn test_slave_passthrough_reaches_master_output() {
        let layout = CoreLayout::new(3, 1, 1).with_reference();
        let mut master = EntanglerCore::new(layout).unwrap();
        let mut slave = EntanglerCore::new(layout).unwrap();
        master.configure(ConfigWord { enable: false, is_master: true, standalone: false });
        slave.configure(ConfigWord { enable: false, is_master: false, standalone: false });
        slave.set_passthrough(SHARED_OUTPUT, true);
        let mut pair = LinkedPair::new(master, slave);

        pair.step();
        assert!(pair.slave_signals().contains(LinkSignal::ReferenceShare));
        assert!(!pair.master.output_levels()[SHARED_OUTPUT]);

        pair.step();
        assert!(pair.master.peer_reference());
        assert_eq!(pair.master.output_levels(), vec![false, false, true]);

        // An enabled master drives its own pulse unit instead
        pair.master.configure(ConfigWord { enable: true, is_master: true, standalone: false });
        pair.step();
        assert!(!pair.master.output_levels()[SHARED_OUTPUT]);
    }

    #[test]
    fn test_slave_pulse_output_is_forwarded() {
        let layout = CoreLayout::new(3, 1, 1).with_reference();
        let mut slave = EntanglerCore::new(layout).unwrap();
        slave.set_cycle_length(10);
        slave.set_window(ChannelId::Output(SHARED_OUTPUT), TimingWindow::new(2, 4)).unwrap();
        slave.configure(ConfigWord { enable: true, is_master: false, standalone: true });
        slave.arm(100);

        let mut forwarded = Vec::new();
        for _ in 0..10 {
            let out = slave.step(LinkMessage::EMPTY);
            forwarded.push(out.contains(LinkSignal::ReferenceShare));
        }
        let expected: Vec<bool> = (0..10).map(|m| (2..4).contains(&m)).collect();
        assert_eq!(forwarded, expected);
    }

    #[test]
    fn test_reference_share_requires_both_references() {
        let master = EntanglerCore::new(CoreLayout::new(1, 1, 1).with_reference()).unwrap();
        let slave = EntanglerCore::new(CoreLayout::new(1, 1, 1)).unwrap();
        assert!(!LinkedPair::new(master, slave).shares_reference());

        let master = EntanglerCore::new(CoreLayout::new(1, 1, 1).with_reference()).unwrap();
        let slave = EntanglerCore::new(CoreLayout::new(1, 1, 1).with_reference()).unwrap();
        assert!(LinkedPair::new(master, slave).shares_reference());
    }
}
