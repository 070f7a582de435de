//! Entangler core.
//!
//! One [`EntanglerCore`] owns a cycle sequencer, its pulse and gate units,
//! the optional reference unit and the herald matcher. The register file is
//! only a decoder in front of them: every access is routed to the unit that
//! owns the state.
//!
//! Register traffic can be applied immediately ([`EntanglerCore::write_register`],
//! [`EntanglerCore::read_register`]) or queued with [`EntanglerCore::submit`]
//! and applied atomically at the start of the next tick, with read replies and
//! run completions reported as [`CoreEvent`]s.

use std::collections::VecDeque;

use crate::device::{
    ChannelId, ConfigError, ConfigWord, Control, CoreLayout, GateUnit, GatingMode, HeraldMatcher,
    HeraldSet, PulseUnit, RegisterAddress, RegisterError, SpecialRegister, StatusWord, Timestamp,
    TimingWindow, TimingWord, register_name,
};

use super::link::{LinkMessage, LinkSignal};
use super::sequencer::{
    CycleSequencer, RunOutcome, RunState, SequencerState, TickOutcome, TickPhase,
};
use super::stimulus::{Edge, EdgeSchedule, InputLine, TickEdges};

/// A queued register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCommand {
    Write { address: u32, data: u32 },
    Read { address: u32 },
}

/// Something the core reports back to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Reply to a queued read.
    ReadReply { address: u32, value: u32 },
    /// A queued access was rejected by the address decoder.
    BusError { address: u32, error: RegisterError },
    /// The run ended.
    RunComplete { outcome: RunOutcome, tick: u64 },
}

/// A single Entangler core.
#[derive(Debug, Clone)]
pub struct EntanglerCore {
    layout: CoreLayout,
    sequencer: CycleSequencer,
    pulses: Vec<PulseUnit>,
    gates: Vec<GateUnit>,
    reference: Option<GateUnit>,
    heralds: HeraldMatcher,
    passthrough: Vec<bool>,
    schedule: EdgeSchedule,
    /// One-off edges for the next tick, as fine offsets.
    driven: SmallEdges,
    commands: VecDeque<RegisterCommand>,
    events: Vec<CoreEvent>,
    /// Slave's shared output line, as seen over the link.
    peer_reference: bool,
    ticks: u64,
}

type SmallEdges = smallvec::SmallVec<[(InputLine, u8); 4]>;

/// Output line a slave forwards to its master over the Reference-share pin.
pub const SHARED_OUTPUT: usize = 2;

impl EntanglerCore {
    /// Build a core with the given layout.
    pub fn new(layout: CoreLayout) -> Result<Self, ConfigError> {
        layout.validate()?;
        log::debug!("Building Entangler core: {}", layout);
        Ok(Self {
            layout,
            sequencer: CycleSequencer::new(layout.core_link),
            pulses: vec![PulseUnit::new(); layout.num_outputs],
            gates: vec![GateUnit::new(); layout.num_inputs],
            reference: layout.has_reference.then(GateUnit::new),
            heralds: HeraldMatcher::new(layout.num_inputs, layout.num_patterns),
            passthrough: vec![false; layout.num_outputs],
            schedule: EdgeSchedule::new(),
            driven: SmallEdges::new(),
            commands: VecDeque::new(),
            events: Vec::new(),
            peer_reference: false,
            ticks: 0,
        })
    }

    pub fn layout(&self) -> &CoreLayout {
        &self.layout
    }

    pub fn sequencer(&self) -> &CycleSequencer {
        &self.sequencer
    }

    pub fn run_state(&self) -> RunState {
        *self.sequencer.run_state()
    }

    /// Outcome of the last run, once it has ended.
    pub fn outcome(&self) -> Option<RunOutcome> {
        self.sequencer.state().outcome()
    }

    /// Armed or running.
    pub fn is_running(&self) -> bool {
        self.sequencer.state().is_live()
    }

    /// Ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn status(&self) -> StatusWord {
        let state = self.sequencer.state();
        StatusWord {
            running: state.is_live(),
            success: state == SequencerState::Success,
            timed_out: state == SequencerState::TimedOut,
        }
    }

    // === Unit access ===

    /// Apply a CONFIG word.
    pub fn configure(&mut self, word: ConfigWord) {
        self.sequencer.configure(word);
        if !word.enable {
            for gate in self.gates.iter_mut().chain(self.reference.iter_mut()) {
                gate.clear();
            }
            for pulse in &mut self.pulses {
                pulse.clear();
            }
        }
    }

    pub fn set_cycle_length(&mut self, cycle_length: u32) {
        self.sequencer.set_cycle_length(cycle_length);
    }

    /// Arm a run. Latched timestamps of the previous run are discarded.
    pub fn arm(&mut self, timeout: u32) -> bool {
        if !self.sequencer.arm(timeout) {
            return false;
        }
        for gate in self.gates.iter_mut().chain(self.reference.iter_mut()) {
            gate.clear();
        }
        true
    }

    /// Stage a timing window for a channel.
    pub fn set_window(&mut self, channel: ChannelId, window: TimingWindow) -> Result<(), RegisterError> {
        let out_of_range = RegisterError::ChannelOutOfRange {
            selector: channel_selector(channel),
            count: self.layout.channel_count(),
        };
        let unit = self.layout.index_of(channel).ok_or_else(|| out_of_range.clone())?;
        log::trace!("Window {} <- {} (index {})", channel, window, unit);
        match channel {
            ChannelId::Output(i) => {
                self.pulses.get_mut(i).ok_or(out_of_range)?.set_window(window);
            }
            ChannelId::Input(i) => {
                let cycle_relative = self.layout.gating == GatingMode::Cycle;
                if cycle_relative && window != TimingWindow::DISABLED && !window.is_valid_gate() {
                    log::warn!("Window {} on {} can never latch an edge", window, channel);
                }
                self.gates.get_mut(i).ok_or(out_of_range)?.set_window(window);
            }
            ChannelId::Reference => {
                let reference = self.reference.as_mut().ok_or(out_of_range)?;
                if window != TimingWindow::DISABLED && !window.is_valid_gate() {
                    log::warn!("Window {} on {} can never latch an edge", window, channel);
                }
                reference.set_window(window);
            }
        }
        Ok(())
    }

    /// Most recently written window of a channel.
    pub fn window(&self, channel: ChannelId) -> Option<TimingWindow> {
        match channel {
            ChannelId::Output(i) => self.pulses.get(i).map(PulseUnit::window),
            ChannelId::Input(i) => self.gates.get(i).map(GateUnit::window),
            ChannelId::Reference => self.reference.as_ref().map(GateUnit::window),
        }
    }

    /// Stage a new herald pattern set.
    pub fn set_heralds(&mut self, set: HeraldSet) {
        log::trace!("Heralds <- {}", set);
        self.heralds.set_patterns(set);
    }

    /// Most recently written herald pattern set.
    pub fn heralds(&self) -> &HeraldSet {
        self.heralds.patterns()
    }

    /// Latched timestamp of a channel. Output channels never latch.
    pub fn timestamp(&self, channel: ChannelId) -> Option<Timestamp> {
        match channel {
            ChannelId::Output(i) => (i < self.layout.num_outputs).then_some(Timestamp::NONE),
            ChannelId::Input(i) => self.gates.get(i).map(GateUnit::timestamp),
            ChannelId::Reference => self.reference.as_ref().map(GateUnit::timestamp),
        }
    }

    /// Latched timestamps of all gated channels (inputs, then reference).
    pub fn timestamps(&self) -> Vec<(ChannelId, Timestamp)> {
        self.layout
            .channels()
            .filter(|ch| !matches!(ch, ChannelId::Output(_)))
            .filter_map(|ch| self.timestamp(ch).map(|ts| (ch, ts)))
            .collect()
    }

    /// Input pattern of the current (or last) cycle, bit i = input i.
    pub fn pattern(&self) -> u32 {
        self.gates
            .iter()
            .enumerate()
            .filter(|(_, g)| g.triggered())
            .fold(0, |acc, (i, _)| acc | 1 << i)
    }

    // === Register file ===

    /// Apply a register write.
    pub fn write_register(&mut self, address: u32, data: u32) -> Result<(), RegisterError> {
        let addr = RegisterAddress::decode(address, &self.layout)?;
        log::trace!(
            "write {} <- 0x{:08X}",
            register_name(addr, &self.layout),
            data
        );
        match addr.control {
            Control::Special => match addr.special_register()? {
                SpecialRegister::Config => self.configure(ConfigWord::from_bits(data)),
                SpecialRegister::Run => {
                    self.arm(data);
                }
                SpecialRegister::CycleLength => self.set_cycle_length(data),
                SpecialRegister::Heralds => self.set_heralds(HeraldSet::from_word(
                    data,
                    self.layout.num_inputs,
                    self.layout.num_patterns,
                )),
            },
            Control::Timing => {
                let channel = addr.channel(&self.layout)?;
                self.set_window(channel, TimingWord::from_bits(data).window())?;
            }
            Control::Status | Control::Timestamp => return Err(RegisterError::ReadOnly(addr)),
        }
        Ok(())
    }

    /// Serve a register read.
    pub fn read_register(&self, address: u32) -> Result<u32, RegisterError> {
        let addr = RegisterAddress::decode(address, &self.layout)?;
        let value = match addr.control {
            Control::Status => {
                let run = self.sequencer.run_state();
                match addr.special_register()? {
                    SpecialRegister::Config => self.status().to_bits(),
                    SpecialRegister::Run => run.cycle_count as u32,
                    SpecialRegister::CycleLength => run.time_remaining,
                    SpecialRegister::Heralds if self.layout.has_reference => run.trigger_count as u32,
                    SpecialRegister::Heralds => return Err(RegisterError::UnknownSpecial(addr.selector)),
                }
            }
            Control::Timestamp => {
                let channel = addr.channel(&self.layout)?;
                self.timestamp(channel).map_or(0, |ts| ts.raw() as u32)
            }
            Control::Special | Control::Timing => return Err(RegisterError::WriteOnly(addr)),
        };
        log::trace!("read {} -> 0x{:X}", register_name(addr, &self.layout), value);
        Ok(value)
    }

    /// Queue a register access for the next tick.
    pub fn submit(&mut self, command: RegisterCommand) {
        self.commands.push_back(command);
    }

    /// Take all pending events.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    fn apply_commands(&mut self) {
        while let Some(command) = self.commands.pop_front() {
            let (address, result) = match command {
                RegisterCommand::Write { address, data } => {
                    (address, self.write_register(address, data).map(|_| None))
                }
                RegisterCommand::Read { address } => {
                    (address, self.read_register(address).map(Some))
                }
            };
            match result {
                Ok(Some(value)) => self.events.push(CoreEvent::ReadReply { address, value }),
                Ok(None) => {}
                Err(error) => {
                    log::warn!("Register access at 0x{:X} rejected: {}", address, error);
                    self.events.push(CoreEvent::BusError { address, error });
                }
            }
        }
    }

    // === Lines ===

    /// Edge schedule replayed every cycle.
    pub fn schedule(&self) -> &EdgeSchedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut EdgeSchedule {
        &mut self.schedule
    }

    /// Inject one edge during the next tick, `fine` units into it.
    pub fn drive_edge(&mut self, line: InputLine, fine: u8) {
        let exists = match line {
            InputLine::Input(i) => i < self.layout.num_inputs,
            InputLine::Reference => self.layout.has_reference,
        };
        if !exists {
            log::warn!("Edge on missing line {:?} dropped", line);
            return;
        }
        self.driven.push((line, fine));
    }

    /// Level driven on output `i` while the core is disabled.
    pub fn set_passthrough(&mut self, output: usize, level: bool) {
        if let Some(p) = self.passthrough.get_mut(output) {
            *p = level;
        }
    }

    /// Current level of output `i`.
    ///
    /// A disabled core drives its passthrough levels. On a linked master
    /// with the shared line, output [`SHARED_OUTPUT`] also follows the
    /// slave's forwarded level.
    pub fn output_level(&self, i: usize) -> bool {
        if self.sequencer.is_enabled() {
            return self.pulses.get(i).is_some_and(PulseUnit::output);
        }
        let passthrough = self.passthrough.get(i).copied().unwrap_or(false);
        let forwarded = i == SHARED_OUTPUT && self.shares_output() && self.sequencer.config().is_master;
        passthrough || (forwarded && self.peer_reference)
    }

    /// Current output line levels.
    pub fn output_levels(&self) -> Vec<bool> {
        (0..self.layout.num_outputs).map(|i| self.output_level(i)).collect()
    }

    /// Slave level of the shared output line on the last tick.
    pub fn peer_reference(&self) -> bool {
        self.peer_reference
    }

    /// Built with the link pins and the shared reference line.
    fn shares_output(&self) -> bool {
        self.layout.core_link && self.layout.has_reference
    }

    // === Clock ===

    /// Advance one coarse tick. `link` holds the peer's signals for this
    /// tick; the return value is what this core drives onto the link.
    pub fn step(&mut self, link: LinkMessage) -> LinkMessage {
        self.apply_commands();
        self.peer_reference = link.contains(LinkSignal::ReferenceShare);

        match self.sequencer.begin_tick(link) {
            TickPhase::Inactive => {
                for pulse in &mut self.pulses {
                    pulse.clear();
                }
            }
            TickPhase::Finished(outcome) => self.complete(outcome),
            TickPhase::Active { m, cycle_start } => {
                if cycle_start {
                    self.begin_cycle();
                }
                let herald = self.evaluate_units(m);
                match self.sequencer.end_tick(herald, link) {
                    TickOutcome::Finished(outcome) => self.complete(outcome),
                    TickOutcome::CycleComplete | TickOutcome::Continue => {}
                }
            }
        }
        self.driven.clear();
        self.ticks += 1;

        let mut out = self.sequencer.link_outputs();
        if self.shares_output() && !self.sequencer.config().is_master {
            out.set(LinkSignal::ReferenceShare, self.output_level(SHARED_OUTPUT));
        }
        out
    }

    fn begin_cycle(&mut self) {
        for pulse in &mut self.pulses {
            pulse.begin_cycle();
        }
        for gate in self.gates.iter_mut().chain(self.reference.iter_mut()) {
            gate.begin_cycle();
        }
        self.heralds.begin_cycle();
    }

    /// Evaluate pulse and gate units at coarse tick `m`, return the herald.
    fn evaluate_units(&mut self, m: u16) -> bool {
        if self.sequencer.config().cycle_length > 0 {
            for pulse in &mut self.pulses {
                pulse.evaluate(m);
            }
            let cycle = self.sequencer.run_state().cycle_count;
            for edge in self.tick_edges(cycle, m) {
                self.latch(edge);
            }
        }
        self.heralds.is_match(self.pattern())
    }

    /// Scheduled and driven edges of this tick; references first on ties.
    fn tick_edges(&self, cycle: u16, m: u16) -> TickEdges {
        let mut edges = self.schedule.edges_at(cycle, m);
        edges.extend(self.driven.iter().map(|&(line, fine)| Edge {
            line,
            time: Timestamp::from_parts(m, fine),
        }));
        edges.sort_by_key(|e| (e.time, e.line != InputLine::Reference));
        edges
    }

    fn latch(&mut self, edge: Edge) {
        match edge.line {
            InputLine::Reference => {
                let Some(reference) = self.reference.as_mut() else {
                    return;
                };
                if reference.observe(edge.time) {
                    self.sequencer.record_trigger();
                    log::trace!("Reference latched at {}", edge.time);
                }
            }
            InputLine::Input(i) => {
                let reference = self
                    .reference
                    .as_ref()
                    .filter(|r| r.triggered())
                    .map(GateUnit::timestamp);
                let Some(gate) = self.gates.get_mut(i) else {
                    return;
                };
                let latched = match self.layout.gating {
                    GatingMode::Cycle => gate.observe(edge.time),
                    GatingMode::Reference => match reference {
                        Some(reference) => gate.observe_relative(edge.time, reference),
                        None => false,
                    },
                };
                if latched {
                    log::trace!("Input {} latched at {}", i, edge.time);
                }
            }
        }
    }

    fn complete(&mut self, outcome: RunOutcome) {
        for pulse in &mut self.pulses {
            pulse.clear();
        }
        self.events.push(CoreEvent::RunComplete {
            outcome,
            tick: self.ticks,
        });
    }

    // === Event-driven support ===

    /// Upcoming ticks that would change nothing but the clock and counters.
    pub fn quiet_ticks(&self) -> u32 {
        if !self.commands.is_empty() || !self.driven.is_empty() {
            return 0;
        }
        let quiet = self.sequencer.quiet_ticks();
        if quiet == 0 || self.sequencer.state() != SequencerState::Running {
            return quiet;
        }
        let m = self.sequencer.m();
        let cycle = self.sequencer.run_state().cycle_count;
        match self.schedule.next_edge_tick(cycle, m) {
            Some(next) => quiet.min((next - m) as u32),
            None => quiet,
        }
    }

    /// Jump over `ticks` quiet ticks.
    pub fn skip_ticks(&mut self, ticks: u32) {
        if ticks == 0 {
            return;
        }
        self.sequencer.skip_ticks(ticks);
        if self.sequencer.state() == SequencerState::Running {
            let last = self.sequencer.m() - 1;
            for pulse in &mut self.pulses {
                pulse.evaluate(last);
            }
        }
        self.ticks += ticks as u64;
    }
}

/// Selector a channel would use in an unbounded layout, for error reports.
fn channel_selector(channel: ChannelId) -> u16 {
    match channel {
        ChannelId::Output(i) | ChannelId::Input(i) => i as u16,
        ChannelId::Reference => u16::MAX,
    }
}
