//! Scenarios described in TOML.
//!
//! A scenario builds one standalone core, programs it through the register
//! file, schedules input edges, runs it in an [`Engine`] and compares the
//! result against optional expectations.
//!
//! # Example Scenario
//!
//! ```toml
//! [scenario]
//! name = "herald_in_cycle_three"
//!
//! [core]
//! num_outputs = 1
//! num_inputs = 1
//! num_patterns = 1
//!
//! [run]
//! cycle_length = 100      # coarse ticks
//! timeout = 500           # coarse ticks
//! heralds = [0b1]
//!
//! # Register values: coarse ticks for outputs, timestamp units for inputs
//! [[timing]]
//! channel = "out0"
//! start = 10
//! stop = 20
//!
//! [[timing]]
//! channel = "in0"
//! start = 10
//! stop = 20
//!
//! [[edge]]
//! line = "in0"
//! time = 15
//! cycle = 3               # omit for every cycle
//!
//! [expected]
//! outcome = "success"
//! cycles = 3
//! timestamps = { in0 = 15 }
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::config::Settings;
use crate::device::core_spec::COARSE_PERIOD_NS;
use crate::device::{
    ChannelId, ConfigWord, CoreLayout, HeraldSet, RegisterAddress, SpecialRegister, Timestamp,
    TimingWord,
};
use crate::emu::{Engine, EntanglerCore, InputLine, RunOutcome, SimMode};

/// A scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub scenario: ScenarioInfo,
    /// Build settings layered over the loaded ones.
    #[serde(default)]
    pub core: Settings,
    pub run: RunDef,
    #[serde(default)]
    pub timing: Vec<TimingDef>,
    #[serde(default)]
    pub edge: Vec<EdgeDef>,
    #[serde(default)]
    pub expected: Option<ExpectedDef>,
}

/// Scenario metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Run parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RunDef {
    pub cycle_length: u32,
    pub timeout: u32,
    #[serde(default)]
    pub heralds: Vec<u32>,
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,
}

fn default_max_ticks() -> u64 {
    1_000_000
}

/// Timing window of one channel, in register units.
#[derive(Debug, Clone, Deserialize)]
pub struct TimingDef {
    pub channel: String,
    pub start: u32,
    pub stop: u32,
}

/// A scheduled input edge.
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeDef {
    pub line: String,
    /// Cycle-relative timestamp.
    pub time: u32,
    /// Only in this cycle (default: every cycle).
    #[serde(default)]
    pub cycle: Option<u16>,
}

/// Expected outcome name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedOutcome {
    Success,
    Timeout,
}

impl From<RunOutcome> for ExpectedOutcome {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success => ExpectedOutcome::Success,
            RunOutcome::TimedOut => ExpectedOutcome::Timeout,
        }
    }
}

/// Expected results; absent fields are not checked.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpectedDef {
    pub outcome: Option<ExpectedOutcome>,
    pub cycles: Option<u32>,
    pub time_remaining: Option<u32>,
    pub triggers: Option<u32>,
    #[serde(default)]
    pub timestamps: BTreeMap<String, u32>,
}

/// A value that differs from the expectation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected {}, got {}", self.field, self.expected, self.actual)
    }
}

/// What a scenario run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub name: String,
    pub mode: SimMode,
    pub outcome: Option<RunOutcome>,
    pub ticks: u64,
    pub cycles: u32,
    pub time_remaining: u32,
    /// Present only with a reference line.
    pub triggers: Option<u32>,
    pub timestamps: Vec<(ChannelId, Timestamp)>,
}

impl Scenario {
    /// Load a scenario from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("In scenario {}", path.display()))
    }

    /// Parse a scenario from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse scenario")
    }

    /// Core layout: `base` settings with the scenario's overrides applied.
    pub fn layout(&self, base: &Settings) -> Result<CoreLayout> {
        let mut settings = base.clone();
        settings.merge(self.core.clone());
        settings
            .layout()
            .with_context(|| format!("Invalid core in scenario '{}'", self.scenario.name))
    }

    /// Build and program a core, without arming it.
    pub fn build(&self, base: &Settings) -> Result<EntanglerCore> {
        let layout = self.layout(base)?;
        let mut core = EntanglerCore::new(layout)?;

        let write = |core: &mut EntanglerCore, address: RegisterAddress, data: u32| {
            core.write_register(address.encode(&layout), data)
                .with_context(|| format!("Writing {}", address))
        };
        let config = RegisterAddress::special(SpecialRegister::Config);
        let standalone = ConfigWord {
            enable: false,
            is_master: false,
            standalone: true,
        };

        write(&mut core, config, standalone.to_bits())?;
        write(
            &mut core,
            RegisterAddress::special(SpecialRegister::CycleLength),
            self.run.cycle_length,
        )?;

        for timing in &self.timing {
            let channel = parse_channel(&timing.channel)?;
            let address = RegisterAddress::timing(&layout, channel)
                .with_context(|| format!("Channel {} not present on {}", channel, layout))?;
            let word = TimingWord {
                start: timing.start as u16,
                stop: timing.stop as u16,
            };
            if timing.start > u16::MAX as u32 || timing.stop > u16::MAX as u32 {
                log::warn!("Timing of {} exceeds 16 bits and will be truncated", channel);
            }
            write(&mut core, address, word.to_bits())?;
        }

        if self.run.heralds.len() > layout.num_patterns {
            bail!(
                "{} herald patterns given, core has {} slots",
                self.run.heralds.len(),
                layout.num_patterns
            );
        }
        let heralds = HeraldSet::with_patterns(layout.num_inputs, layout.num_patterns, &self.run.heralds);
        write(
            &mut core,
            RegisterAddress::special(SpecialRegister::Heralds),
            heralds.to_word(),
        )?;

        for edge in &self.edge {
            let channel = parse_channel(&edge.line)?;
            let line = InputLine::from_channel(channel)
                .filter(|_| layout.index_of(channel).is_some())
                .with_context(|| format!("Edge on {}: not an input line of {}", channel, layout))?;
            let time = Timestamp::new(edge.time);
            match edge.cycle {
                Some(cycle) => core.schedule_mut().in_cycle(line, cycle, time),
                None => core.schedule_mut().every_cycle(line, time),
            }
        }

        write(
            &mut core,
            config,
            ConfigWord {
                enable: true,
                ..standalone
            }
            .to_bits(),
        )?;
        Ok(core)
    }

    /// Build, arm and run the scenario.
    pub fn run(&self, base: &Settings, mode: SimMode) -> Result<RunReport> {
        let mut core = self.build(base)?;
        let run = RegisterAddress::special(SpecialRegister::Run).encode(core.layout());
        core.write_register(run, self.run.timeout)?;

        log::info!("Running scenario '{}' ({})", self.scenario.name, mode);
        let mut engine = Engine::new(core).with_mode(mode);
        engine.run(self.run.max_ticks);
        if engine.core.is_running() {
            log::warn!(
                "Scenario '{}' still running after {} ticks",
                self.scenario.name,
                self.run.max_ticks
            );
        }

        let core = &engine.core;
        let state = core.run_state();
        Ok(RunReport {
            name: self.scenario.name.clone(),
            mode,
            outcome: core.outcome(),
            ticks: engine.total_ticks,
            cycles: state.cycle_count as u32,
            time_remaining: state.time_remaining,
            triggers: core.layout().has_reference.then_some(state.trigger_count as u32),
            timestamps: core.timestamps(),
        })
    }
}

fn parse_channel(name: &str) -> Result<ChannelId> {
    name.parse::<ChannelId>().map_err(anyhow::Error::msg)
}

impl RunReport {
    /// Compare against expectations.
    pub fn check(&self, expected: &ExpectedDef) -> Result<Vec<Mismatch>> {
        let mut mismatches = Vec::new();
        let mut compare = |field: &str, expected: String, actual: String| {
            if expected != actual {
                mismatches.push(Mismatch {
                    field: field.to_string(),
                    expected,
                    actual,
                });
            }
        };

        if let Some(outcome) = expected.outcome {
            let actual = self.outcome.map(ExpectedOutcome::from);
            compare("outcome", format!("{:?}", Some(outcome)), format!("{:?}", actual));
        }
        if let Some(cycles) = expected.cycles {
            compare("cycles", cycles.to_string(), self.cycles.to_string());
        }
        if let Some(left) = expected.time_remaining {
            compare("time_remaining", left.to_string(), self.time_remaining.to_string());
        }
        if let Some(triggers) = expected.triggers {
            let actual = self.triggers.map_or("-".to_string(), |t| t.to_string());
            compare("triggers", triggers.to_string(), actual);
        }
        for (name, &value) in &expected.timestamps {
            let channel = parse_channel(name)?;
            let actual = self
                .timestamps
                .iter()
                .find(|(ch, _)| *ch == channel)
                .map_or("-".to_string(), |(_, ts)| ts.raw().to_string());
            compare(&format!("timestamp[{}]", channel), value.to_string(), actual);
        }
        Ok(mismatches)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = self.outcome.map_or("unfinished".to_string(), |o| o.to_string());
        writeln!(f, "Scenario: {} ({})", self.name, self.mode)?;
        writeln!(f, "  Outcome:        {}", outcome)?;
        writeln!(
            f,
            "  Ticks:          {} ({} ns)",
            self.ticks,
            self.ticks * COARSE_PERIOD_NS as u64
        )?;
        writeln!(f, "  Cycles:         {}", self.cycles)?;
        writeln!(f, "  Time remaining: {}", self.time_remaining)?;
        if let Some(triggers) = self.triggers {
            writeln!(f, "  Triggers:       {}", triggers)?;
        }
        writeln!(f, "  Timestamps:")?;
        for (channel, ts) in &self.timestamps {
            if ts.is_none() {
                writeln!(f, "    {:<4} -", channel)?;
            } else {
                writeln!(f, "    {:<4} {:>5} ({})", channel, ts.raw(), ts)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HERALD_SCENARIO: &str = r#"
[scenario]
name = "herald_in_cycle_three"

[core]
num_outputs = 1
num_inputs = 1
num_patterns = 1

[run]
cycle_length = 100
timeout = 500
heralds = [0b1]

[[timing]]
channel = "out0"
start = 10
stop = 20

[[timing]]
channel = "in0"
start = 10
stop = 20

[[edge]]
line = "in0"
time = 15
cycle = 3

[expected]
outcome = "success"
cycles = 3
timestamps = { in0 = 15 }
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::parse(HERALD_SCENARIO).unwrap();
        assert_eq!(scenario.scenario.name, "herald_in_cycle_three");
        assert_eq!(scenario.run.max_ticks, 1_000_000);
        assert_eq!(scenario.timing.len(), 2);
        assert_eq!(scenario.edge[0].cycle, Some(3));
        let expected = scenario.expected.unwrap();
        assert_eq!(expected.outcome, Some(ExpectedOutcome::Success));
        assert_eq!(expected.timestamps.get("in0"), Some(&15));
    }

    #[test]
    fn test_run_scenario_both_modes() {
        let scenario = Scenario::parse(HERALD_SCENARIO).unwrap();
        let expected = scenario.expected.clone().unwrap();
        let mut reports = Vec::new();
        for mode in [SimMode::CycleAccurate, SimMode::EventDriven] {
            let report = scenario.run(&Settings::default(), mode).unwrap();
            assert_eq!(report.check(&expected).unwrap(), Vec::new());
            assert_eq!(report.triggers, None);
            reports.push(report);
        }
        assert_eq!(reports[0].ticks, reports[1].ticks);
        assert_eq!(reports[0].time_remaining, reports[1].time_remaining);
    }

    #[test]
    fn test_timeout_scenario_reports_mismatch() {
        let text = HERALD_SCENARIO.replace("cycle = 3", "cycle = 9");
        let scenario = Scenario::parse(&text).unwrap();
        let report = scenario.run(&Settings::default(), SimMode::EventDriven).unwrap();
        assert_eq!(report.outcome, Some(RunOutcome::TimedOut));
        assert_eq!(report.cycles, 5);

        let mismatches = report.check(scenario.expected.as_ref().unwrap()).unwrap();
        let fields: Vec<&str> = mismatches.iter().map(|m| m.field.as_str()).collect();
        assert_eq!(fields, vec!["outcome", "cycles", "timestamp[in0]"]);
        assert_eq!(mismatches[2].actual, "0");
    }

    #[test]
    fn test_reference_scenario() {
        let text = r#"
[scenario]
name = "reference_triggers"

[core]
num_outputs = 1
num_inputs = 2
num_patterns = 1
use_reference = true

[run]
cycle_length = 10
timeout = 100

[[timing]]
channel = "ref"
start = 8
stop = 80

[[edge]]
line = "ref"
time = 20

[expected]
outcome = "timeout"
cycles = 10
triggers = 10
timestamps = { ref = 20 }
"#;
        let scenario = Scenario::parse(text).unwrap();
        let report = scenario.run(&Settings::default(), SimMode::CycleAccurate).unwrap();
        assert_eq!(report.check(scenario.expected.as_ref().unwrap()).unwrap(), Vec::new());
        assert!(report.to_string().contains("Triggers:       10"));
    }

    #[test]
    fn test_bundled_scenarios_pass() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let mut paths: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();
        assert!(paths.len() >= 3);

        for path in &paths {
            let scenario = Scenario::from_file(path).unwrap();
            let expected = scenario.expected.clone().unwrap();
            for mode in [SimMode::CycleAccurate, SimMode::EventDriven] {
                let report = scenario.run(&Settings::default(), mode).unwrap();
                assert_eq!(report.check(&expected).unwrap(), Vec::new(), "{}", path.display());
            }
        }
    }

    #[test]
    fn test_bad_channel_rejected() {
        let text = HERALD_SCENARIO.replace("channel = \"out0\"", "channel = \"out7\"");
        let scenario = Scenario::parse(&text).unwrap();
        assert!(scenario.build(&Settings::default()).is_err());

        let text = HERALD_SCENARIO.replace("line = \"in0\"", "line = \"out0\"");
        let scenario = Scenario::parse(&text).unwrap();
        assert!(scenario.build(&Settings::default()).is_err());
    }

    #[test]
    fn test_too_many_heralds_rejected() {
        let text = HERALD_SCENARIO.replace("heralds = [0b1]", "heralds = [1, 0]");
        let scenario = Scenario::parse(&text).unwrap();
        assert!(scenario.build(&Settings::default()).is_err());
    }
}
