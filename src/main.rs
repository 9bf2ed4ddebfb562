use anyhow::Context;
use env_logger::Builder;
use log::{LevelFilter, info};
use std::fs;
use std::path::PathBuf;

use fanet_dtn_simulator::common::mission::PathProvider;
use fanet_dtn_simulator::common::scene::SimulationConfig;
use fanet_dtn_simulator::simulation::Simulator;

/// Usage: `fanet-dtn-simulator [CONFIG] [REPORT]`
///
/// Without `CONFIG` the built-in defaults are simulated. The final metrics
/// are printed to stdout, or written to `REPORT` when given.
fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("fanet_dtn_simulator"), LevelFilter::Debug)
        .init();

    info!("Starting up");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let report_path = args.next().map(PathBuf::from);

    let config = match &config_path {
        Some(path) => SimulationConfig::load(path).with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => {
            info!("No configuration given, using defaults");
            SimulationConfig::default()
        }
    };

    let paths = PathProvider::from_config(&config).context("Failed to prepare mission paths")?;
    let mut simulator = Simulator::new(config, &paths).context("Failed to build the simulation")?;
    simulator.run().context("Simulation aborted")?;

    let report = serde_json::to_string_pretty(&simulator.report()).context("Failed to serialize metrics")?;
    match report_path {
        Some(path) => {
            fs::write(&path, report).with_context(|| format!("Failed to write report {}", path.display()))?;
            info!("Metrics written to {}", path.display());
        }
        None => println!("{}", report),
    }
    Ok(())
}
