//! entangler-sim library
//!
//! Cycle-level model of the Entangler gateware core: the channel pulse and
//! gate units, the herald matcher, the cycle sequencer with its master/slave
//! link, the register protocol and a host-side driver.

pub mod config;
pub mod device;
pub mod emu;
pub mod host;
pub mod testing;
