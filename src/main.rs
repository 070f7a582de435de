//! entangler-sim: cycle-level simulator for the Entangler gateware core

use std::env;
use std::path::Path;

use anyhow::{bail, Context};
use entangler_sim::config::Settings;
use entangler_sim::device::{format_address, CoreLayout};
use entangler_sim::emu::SimMode;
use entangler_sim::testing::Scenario;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    if args.iter().any(|a| a == "--sample-config") {
        print!("{}", Settings::sample_config());
        return Ok(());
    }

    let settings = Settings::get();

    if args.iter().any(|a| a == "--registers") {
        let layout = settings.layout().context("Invalid settings")?;
        print_register_map(&layout);
        return Ok(());
    }

    // Parse options
    let mut mode = SimMode::CycleAccurate;
    let mut paths = Vec::new();

    for arg in &args[1..] {
        if arg == "--event-driven" {
            mode = SimMode::EventDriven;
        } else if arg.starts_with('-') {
            bail!("Unknown option: {}", arg);
        } else {
            paths.push(arg.as_str());
        }
    }

    if paths.is_empty() {
        print_usage();
        bail!("No scenario given");
    }

    let mut failed = 0;
    for path in &paths {
        let scenario = Scenario::from_file(Path::new(path))?;
        let report = scenario.run(settings, mode)?;
        print!("{}", report);

        if let Some(expected) = &scenario.expected {
            let mismatches = report.check(expected)?;
            if mismatches.is_empty() {
                println!("  PASS");
            } else {
                failed += 1;
                println!("  FAIL");
                for mismatch in &mismatches {
                    println!("    {}", mismatch);
                }
            }
        }
        println!();
    }

    if failed > 0 {
        bail!("{} of {} scenarios failed", failed, paths.len());
    }
    Ok(())
}

fn print_usage() {
    println!("Usage: entangler-sim [--event-driven] <scenario.toml>...");
    println!("       entangler-sim --registers");
    println!("       entangler-sim --sample-config");
    println!();
    println!("Settings: ./entangler-sim.toml, {}",
        Settings::user_config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/entangler-sim/config.toml".to_string()));
}

/// Print every address of the register map for a layout.
fn print_register_map(layout: &CoreLayout) {
    println!("Core: {}", layout);
    println!("Address width: {} bits ({} selector)", layout.address_bits(), layout.selector_bits());
    println!();
    for address in 0..(1u32 << layout.address_bits()) {
        let line = format_address(address, layout);
        if !line.contains('?') && !line.contains("[invalid]") {
            println!("  {}", line);
        }
    }
}
