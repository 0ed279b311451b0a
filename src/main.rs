use anyhow::Result;
use log::{debug, info};
use std::path::Path;
use std::time::Instant;

// Define modules used by main
mod config;
mod lattice;
mod population;
mod sampler;
mod sim_params;
mod simulation;

use config::SimulationConfig;
use simulation::Simulation;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting plasticity engine...");

    // --- Load Configuration ---
    let config = match std::env::args().nth(1) {
        Some(path) => SimulationConfig::load(&path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            SimulationConfig::load(DEFAULT_CONFIG_PATH)?
        }
        None => {
            info!(
                "No '{}' found; running with built-in defaults.",
                DEFAULT_CONFIG_PATH
            );
            let config = SimulationConfig::default();
            config.validate()?;
            config
        }
    };

    // --- Initialize Simulation ---
    let mut sim = Simulation::new(&config)?;
    info!(
        "Initialized {}x{} lattice with {} agents (seed {}).",
        sim.params.width,
        sim.params.height,
        sim.population_size(),
        sim.params.seed
    );
    debug!("Resolved parameters: {:#?}", sim.params);

    // --- Observation Stream ---
    let stdout = std::io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());
    writer.write_record(&["iter", "x", "y", "agentHere", "Toxin", "agentDegradeRate"])?;

    // --- Simulation Loop ---
    let total_ticks = sim.params.iters;
    info!("Starting simulation loop for {} ticks...", total_ticks);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    let print_interval_secs = 5.0;

    for _ in 0..total_ticks {
        let observations = sim.tick()?;
        for obs in &observations {
            writer.write_record(&[
                obs.tick.to_string(),
                obs.x.to_string(),
                obs.y.to_string(),
                obs.agent_here.to_string(),
                format!("{:.6}", obs.toxin),
                format!("{:.6}", obs.degrade_rate),
            ])?;
        }

        // Print status periodically; per-tick vitals go to the debug log.
        let current_time = Instant::now();
        if current_time
            .duration_since(previous_print_time)
            .as_secs_f64()
            >= print_interval_secs
        {
            info!(
                "Tick [{}/{}] | Population: {} | Mean phenotype: {:.4} | Elapsed: {:.2} s",
                sim.current_tick,
                total_ticks,
                sim.population_size(),
                sim.mean_phenotype(),
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = current_time;
        }
    }

    writer.flush()?;

    info!(
        "Simulation finished after {} ticks in {:.3} seconds; final population: {}.",
        total_ticks,
        start_time.elapsed().as_secs_f64(),
        sim.population_size()
    );
    Ok(())
}
