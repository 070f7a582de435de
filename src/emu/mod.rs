//! Cycle-level simulation of the Entangler core.
//!
//! This module provides the behaviour on top of the [`crate::device`] model:
//! - The cycle sequencer state machine (Idle/Armed/Running/Success/TimedOut)
//! - The core that ties the sequencer to its channel units and register file
//! - The master/slave link between two cores
//! - Input stimulus (scheduled and injected edges)
//! - An engine that clocks a single core, tick by tick or event-driven
//!
//! # Time
//!
//! One step is one coarse tick (8 ns). Within a cycle the sequencer counts
//! coarse ticks `m = 0 .. cycle_length`; timestamps are `m` with three fine
//! bits appended.
//!
//! # Example
//!
//! ```
//! use entangler_sim::device::{ChannelId, ConfigWord, CoreLayout, HeraldSet, Timestamp, TimingWindow};
//! use entangler_sim::emu::{Engine, EntanglerCore, InputLine, RunOutcome};
//!
//! let mut core = EntanglerCore::new(CoreLayout::new(1, 1, 1)).unwrap();
//! core.set_cycle_length(100);
//! core.set_window(ChannelId::Input(0), TimingWindow::new(10, 20)).unwrap();
//! core.set_heralds(HeraldSet::with_patterns(1, 1, &[0b1]));
//! core.configure(ConfigWord { enable: true, is_master: false, standalone: true });
//! core.schedule_mut().in_cycle(InputLine::Input(0), 3, Timestamp::new(15));
//! core.arm(500);
//!
//! let mut engine = Engine::new(core);
//! assert_eq!(engine.run_until_done(1000), Some(RunOutcome::Success));
//! assert_eq!(engine.core.run_state().cycle_count, 3);
//! ```

pub mod sequencer;
pub mod core;
pub mod link;
pub mod stimulus;
pub mod engine;

pub use sequencer::{
    CycleSequencer, LinkRole, RunConfig, RunOutcome, RunState, SequencerState, TickOutcome,
    TickPhase,
};
pub use self::core::{CoreEvent, EntanglerCore, RegisterCommand, SHARED_OUTPUT};
pub use link::{LinkDirection, LinkMessage, LinkSignal, LinkedPair};
pub use stimulus::{Edge, EdgeSchedule, InputLine, ScheduledEdge, TickEdges};
pub use engine::{Breakpoint, Engine, EngineStatus, SimMode};
