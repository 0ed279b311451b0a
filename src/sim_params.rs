use serde::{Deserialize, Serialize};

/// Fraction of a patch's toxin offered to each diffusion target per tick.
/// A fixed model constant, deliberately not a configuration field.
pub const DIFFUSION_RATE: f64 = 0.5;

/// Inclusive rectangle of patches that receives each toxin pulse.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PulseRect {
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

/// Simulation parameters resolved from the configuration, used frequently during ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // Lattice
    pub width: u32,
    pub height: u32,

    // Toxin environment
    pub toxin_conc: f64,
    pub pulse_ticks: u32,
    pub pulse: PulseRect, // already clamped to the lattice
    pub env_noise: f64,

    // Population dynamics
    pub init_pop_size: u32,
    pub basal_growth_rate: f64,
    pub trade_off: f64,
    pub alpha: f64,
    pub switch_rate: f64,
    pub env_response: f64,
    pub dilute_rate: u32,

    // Phenotype mixture (shared by the initial population; inherited verbatim thereafter)
    pub w0: f64,
    pub m0: f64,
    pub v0: f64,
    pub m1: f64,
    pub v1: f64,

    // Run control
    pub iters: u32,
    pub epsilon: f64,
    pub seed: i64, // resolved at config time; the core never consults the clock
}
