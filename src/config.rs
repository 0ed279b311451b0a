use crate::sim_params::{PulseRect, SimParams};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

// Configuration for lattice dimensions
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct LatticeConfig {
    pub width: u32,
    pub height: u32,
}

// Configuration for the toxin environment: pulse schedule, pulse region, signal noise
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ToxinConfig {
    /// Amount of toxin added to each patch of the pulse region per pulse.
    pub toxin_conc: f64,
    /// Tick interval between pulses; tick 0 always pulses.
    pub pulse_ticks: u32,
    /// Inclusive pulse rectangle. Max coordinates are clamped to the lattice.
    pub pulse_min_x: u32,
    pub pulse_max_x: u32,
    pub pulse_min_y: u32,
    pub pulse_max_y: u32,
    /// Amplitude of the uniform noise perturbing the toxin signal.
    pub env_noise: f64,
}

// Configuration for population dynamics and the growth/resistance trade-off
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PopulationConfig {
    pub init_pop_size: u32,
    /// Base reproduction probability before the resistance cost is applied.
    pub basal_growth_rate: f64,
    /// Coefficient of the resistance cost.
    pub trade_off: f64,
    /// Exponent of the resistance cost.
    pub alpha: f64,
    /// Per-tick probability that an agent switches phenotype.
    pub switch_rate: f64,
    /// Probability that a switch matches the local signal rather than resampling.
    pub env_response: f64,
    /// Keeps floor(population / dilute_rate) agents when the lattice saturates.
    pub dilute_rate: u32,
}

// Parameters of the two-component gamma mixture the initial population draws
// phenotypes from. Inherited verbatim by offspring.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct MixtureConfig {
    pub w0: f64,
    pub m0: f64,
    pub v0: f64,
    pub m1: f64,
    pub v1: f64,
}

// Run control: tick count, comparison threshold, RNG seed
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct RunConfig {
    pub iters: u32,
    pub epsilon: f64,
    /// Omitted in the file → derived from the wall clock at load time.
    pub seed: Option<i64>,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        LatticeConfig {
            width: 50,
            height: 50,
        }
    }
}

impl Default for ToxinConfig {
    fn default() -> Self {
        ToxinConfig {
            toxin_conc: 1.0,
            pulse_ticks: 20,
            pulse_min_x: 21,
            pulse_max_x: 29,
            pulse_min_y: 0,
            pulse_max_y: 49,
            env_noise: 0.2,
        }
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        PopulationConfig {
            init_pop_size: 200,
            basal_growth_rate: 1.0,
            trade_off: 1.0,
            alpha: 1.0,
            switch_rate: 0.4,
            env_response: 0.5,
            dilute_rate: 100,
        }
    }
}

impl Default for MixtureConfig {
    fn default() -> Self {
        MixtureConfig {
            w0: 0.1,
            m0: 0.2,
            v0: 0.01,
            m1: 0.8,
            v1: 0.01,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            iters: 1000,
            epsilon: 1e-7,
            seed: None,
        }
    }
}

// Main simulation configuration structure, loaded from a TOML file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SimulationConfig {
    pub lattice: LatticeConfig,
    pub toxin: ToxinConfig,
    pub population: PopulationConfig,
    pub mixture: MixtureConfig,
    pub run: RunConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        let config: SimulationConfig = toml::from_str(&config_str).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e)
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects parameter combinations the core is not defined for.
    pub fn validate(&self) -> Result<()> {
        if self.lattice.width == 0 || self.lattice.height == 0 {
            anyhow::bail!("Lattice width and height must both be at least 1.");
        }
        let area = self.lattice.width as u64 * self.lattice.height as u64;
        if self.population.init_pop_size as u64 > area {
            anyhow::bail!(
                "init_pop_size ({}) exceeds lattice capacity ({}x{} = {}).",
                self.population.init_pop_size,
                self.lattice.width,
                self.lattice.height,
                area
            );
        }
        if self.population.dilute_rate == 0 {
            anyhow::bail!("dilute_rate must be at least 1.");
        }
        if self.toxin.pulse_ticks == 0 {
            anyhow::bail!("pulse_ticks must be at least 1.");
        }
        let pulse = self.clamped_pulse_rect();
        if pulse.min_x > pulse.max_x || pulse.min_y > pulse.max_y {
            anyhow::bail!(
                "Pulse region [{}..={}, {}..={}] lies outside the {}x{} lattice.",
                self.toxin.pulse_min_x,
                self.toxin.pulse_max_x,
                self.toxin.pulse_min_y,
                self.toxin.pulse_max_y,
                self.lattice.width,
                self.lattice.height
            );
        }
        if !(0.0..=1.0).contains(&self.mixture.w0) {
            anyhow::bail!("Mixture weight w0 must be within [0, 1].");
        }
        if self.mixture.m0 <= 0.0
            || self.mixture.v0 <= 0.0
            || self.mixture.m1 <= 0.0
            || self.mixture.v1 <= 0.0
        {
            anyhow::bail!("Mixture means and variances must all be positive.");
        }
        if self.run.epsilon <= 0.0 {
            anyhow::bail!("epsilon must be positive.");
        }
        Ok(())
    }

    /// Converts the configuration into the flat parameter set used at runtime.
    /// Assumes `validate` has passed; resolves the seed here so the core never
    /// touches the clock.
    pub fn resolve_params(&self) -> SimParams {
        SimParams {
            width: self.lattice.width,
            height: self.lattice.height,
            toxin_conc: self.toxin.toxin_conc,
            pulse_ticks: self.toxin.pulse_ticks,
            pulse: self.clamped_pulse_rect(),
            env_noise: self.toxin.env_noise,
            init_pop_size: self.population.init_pop_size,
            basal_growth_rate: self.population.basal_growth_rate,
            trade_off: self.population.trade_off,
            alpha: self.population.alpha,
            switch_rate: self.population.switch_rate,
            env_response: self.population.env_response,
            dilute_rate: self.population.dilute_rate,
            w0: self.mixture.w0,
            m0: self.mixture.m0,
            v0: self.mixture.v0,
            m1: self.mixture.m1,
            v1: self.mixture.v1,
            iters: self.run.iters,
            epsilon: self.run.epsilon,
            seed: self.run.seed.unwrap_or_else(wall_clock_seed),
        }
    }

    // Pulse max coordinates are clamped to the lattice edge rather than rejected.
    fn clamped_pulse_rect(&self) -> PulseRect {
        PulseRect {
            min_x: self.toxin.pulse_min_x,
            max_x: self.toxin.pulse_max_x.min(self.lattice.width - 1),
            min_y: self.toxin.pulse_min_y,
            max_y: self.toxin.pulse_max_y.min(self.lattice.height - 1),
        }
    }
}

/// Milliseconds since the Unix epoch, the seed used when none is configured.
fn wall_clock_seed() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
