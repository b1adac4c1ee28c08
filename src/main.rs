// src/main.rs
// Runs impedance check cycles against the simulated fixture and prints
// the JSON report for each.
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};

use neurocheck::drivers::feedback::{LogPixelSink, LogTextSink};
use neurocheck::drivers::bus::{self, probe, scan};
use neurocheck::drivers::{SimulatedFixture, Strategy};
use neurocheck::{Fixture, FixtureConfig, TestReport};

#[derive(Parser, Debug)]
#[command(name = "neurocheck", about = "EEG electrode impedance check")]
struct Args {
    /// Fixture configuration (JSON)
    #[arg(short, long, default_value = "demos/fixture.json")]
    config: PathBuf,

    /// Simulated electrode impedances in ohms, comma separated; `open` for
    /// an unplugged lead
    #[arg(short, long, value_delimiter = ',', default_value = "4700,4700,4700,4700")]
    electrodes: Vec<String>,

    /// Make this channel NACK on the bus (repeatable)
    #[arg(long)]
    fault: Vec<usize>,

    /// Read channels one after another instead of concurrently
    #[arg(long)]
    sequential: bool,

    /// Print the I2C addresses that answer, then exit
    #[arg(long)]
    scan: bool,

    /// Simulated supply rail in volts
    #[arg(long, default_value_t = 3.3)]
    supply: f64,

    /// ADC noise amplitude in LSB
    #[arg(long, default_value_t = 0.0)]
    noise_lsb: f64,

    /// Number of measurement cycles to run
    #[arg(long, default_value_t = 1)]
    cycles: usize,
}

fn parse_electrode(text: &str) -> Result<f64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("open") {
        return Ok(f64::INFINITY);
    }
    let ohms: f64 = text
        .parse()
        .with_context(|| format!("electrode impedance '{text}' is not a number"))?;
    if !ohms.is_finite() || ohms < 0.0 {
        bail!("electrode impedance {ohms} must be a non-negative number of ohms");
    }
    Ok(ohms)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = FixtureConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let electrodes = args
        .electrodes
        .iter()
        .map(|e| parse_electrode(e))
        .collect::<Result<Vec<_>>>()?;

    let mut sim = SimulatedFixture::new(
        args.supply,
        config.channels.reference_resistances_ohms.clone(),
        electrodes,
    )
    .with_gate(config.excitation.polarity)
    .with_noise(args.noise_lsb);
    for channel in &args.fault {
        sim = sim.with_fault(*channel);
    }

    let shared = bus::share(sim.bus());
    if args.scan {
        let found = scan(&mut bus::device(shared));
        let listed: Vec<String> = found.iter().map(|a| format!("0x{a:02X}")).collect();
        println!("{}", listed.join(" "));
        return Ok(());
    }

    let mut fixture = Fixture::new(&config, shared, sim.pin()).context("bringing up fixture")?;
    if let Some(indicators) = &config.indicators {
        fixture = fixture.with_indicator_sink(&config, Box::new(LogPixelSink::new(indicators.pixel_count)));
    }
    if let Some(display) = &config.display {
        if probe(&mut bus::device(shared), display.address) {
            fixture = fixture.with_display_sink(Box::new(LogTextSink));
        } else {
            warn!("no display at {:#04x}; continuing without it", display.address);
        }
    }
    if args.sequential {
        fixture.set_strategy(Strategy::Sequential);
    }

    for cycle in 0..args.cycles.max(1) {
        info!("cycle {}", cycle + 1);
        let result = fixture.run_cycle();
        let report = TestReport::from(&result);
        let json = serde_json::to_string_pretty(&report).context("encoding report")?;
        println!("{json}");
    }
    Ok(())
}
