//! Scenario harness for running Entangler cores from TOML descriptions.
//!
//! This module provides infrastructure for:
//! - Loading scenarios (core layout, run parameters, timings, input edges)
//! - Running them in cycle-accurate or event-driven mode
//! - Checking the run report against expected results
//!
//! # Usage
//!
//! ```bash
//! cargo run -- scenarios/herald.toml --event-driven
//! ```

pub mod scenario;

pub use scenario::{ExpectedDef, ExpectedOutcome, Mismatch, RunReport, Scenario};
