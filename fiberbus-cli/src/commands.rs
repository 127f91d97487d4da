use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use fiberbus_config::FiberbusConfig;
use fiberbus_simulator::{random, Scenario, SimulationReport, Simulator};
use fiberbus_telemetry::{BusLogger, MetricsRecorder};
use tracing::{info, warn};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file; defaults to the layered `config/` lookup.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scenario file on the deterministic scheduler
    Simulate(SimulateArgs),
    /// Write a generated scenario as YAML
    Generate(GenerateArgs),
    /// Run generated scenarios twice each and compare their hashes
    Fuzz(FuzzArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(short, long)]
    pub scenario: PathBuf,
    /// Fail unless the run hashes to this hex digest
    #[arg(long)]
    pub validate_hash: Option<String>,
    /// Print every trace entry
    #[arg(long)]
    pub trace: bool,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long, default_value_t = 50)]
    pub events: usize,
    /// Output file; stdout when absent
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct FuzzArgs {
    /// Initial seed, incremented per iteration
    #[arg(long)]
    pub seed: Option<u64>,
    /// Number of fuzzing iterations (0 for unlimited)
    #[arg(long, default_value_t = 100)]
    pub iterations: usize,
    /// Maximum steps per scenario
    #[arg(long, default_value_t = 200)]
    pub max_events: usize,
}

pub fn run_command(cli: Cli, config: FiberbusConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Simulate(args) => simulate(args, &config),
        Commands::Generate(args) => generate(args, &config),
        Commands::Fuzz(args) => fuzz(args, &config),
    }
}

fn simulate(args: SimulateArgs, config: &FiberbusConfig) -> anyhow::Result<()> {
    let mut scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("loading scenario {}", args.scenario.display()))?;
    if scenario.bus.is_none() {
        scenario.bus = Some(config.bus.clone());
    }

    let report = Simulator::new(config.simulator.clone()).run_scenario(&scenario)?;
    if args.trace {
        for entry in &report.trace {
            println!("{entry}");
        }
    }
    publish(&report, config)?;
    println!("{}", report.hash);

    if let Some(expected) = args.validate_hash {
        if !expected.eq_ignore_ascii_case(&report.hash) {
            bail!("hash mismatch: expected {expected}, got {}", report.hash);
        }
        info!("Hash validated");
    }
    Ok(())
}

fn generate(args: GenerateArgs, config: &FiberbusConfig) -> anyhow::Result<()> {
    let seed = args.seed.unwrap_or(config.simulator.seed);
    let yaml = random::generate(seed, args.events).to_yaml()?;
    match args.output {
        Some(path) => std::fs::write(&path, yaml)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{yaml}"),
    }
    Ok(())
}

fn fuzz(args: FuzzArgs, config: &FiberbusConfig) -> anyhow::Result<()> {
    let simulator = Simulator::new(config.simulator.clone());
    let mut seed = args.seed.unwrap_or(config.simulator.seed);
    let mut completed = 0usize;

    while args.iterations == 0 || completed < args.iterations {
        let events = 1 + (seed as usize % args.max_events.max(1));
        let scenario = random::generate(seed, events);
        check_reproducible(&simulator, &scenario)
            .with_context(|| format!("fuzzing seed {seed}"))?;

        seed = seed.wrapping_add(1);
        completed += 1;
    }
    info!(iterations = completed, "Fuzzing finished");
    Ok(())
}

/// Runs `scenario` twice and fails if the runs diverge.
fn check_reproducible(simulator: &Simulator, scenario: &Scenario) -> anyhow::Result<String> {
    let first = simulator.run_scenario(scenario)?;
    let second = simulator.run_scenario(scenario)?;
    if first.hash != second.hash {
        warn!(scenario = %scenario.name, "Runs diverged");
        bail!(
            "non-deterministic run of {}: {} != {}",
            scenario.name,
            first.hash,
            second.hash
        );
    }
    Ok(first.hash)
}

fn publish(report: &SimulationReport, config: &FiberbusConfig) -> anyhow::Result<()> {
    BusLogger::log_stats(&report.stats);
    if config.telemetry.metrics {
        let recorder = MetricsRecorder::new()?;
        recorder.record(&report.stats);
        print!("{}", recorder.gather_metrics()?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_simulate_with_global_config() {
        let cli = Cli::try_parse_from([
            "fiberbus",
            "simulate",
            "--scenario",
            "scenarios/busy_drop.yaml",
            "--validate-hash",
            "abc",
            "--config",
            "custom.yaml",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("custom.yaml")));
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.scenario, PathBuf::from("scenarios/busy_drop.yaml"));
                assert_eq!(args.validate_hash.as_deref(), Some("abc"));
                assert!(!args.trace);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn generated_scenarios_reproduce() {
        let simulator = Simulator::new(FiberbusConfig::default().simulator);
        let hash = check_reproducible(&simulator, &random::generate(3, 25)).unwrap();
        assert_eq!(hash.len(), 64);
    }
}
