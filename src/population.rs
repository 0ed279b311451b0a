use crate::sampler::draw_phenotype;
use crate::sim_params::SimParams;
use anyhow::Result;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Heritable parameters, copied verbatim from parent to offspring.
/// Only the sampled phenotype varies between generations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Genotype {
    // Mixture the phenotype is drawn from
    pub w0: f64,
    pub m0: f64,
    pub v0: f64,
    pub m1: f64,
    pub v1: f64,
    /// Per-tick probability of a phenotype switch.
    pub switch_rate: f64,
    /// Probability a switch matches the local signal instead of resampling.
    pub env_response: f64,
}

impl Genotype {
    /// The genotype every founder agent shares, taken from the configuration.
    pub fn founder(params: &SimParams) -> Self {
        Genotype {
            w0: params.w0,
            m0: params.m0,
            v0: params.v0,
            m1: params.m1,
            v1: params.v1,
            switch_rate: params.switch_rate,
            env_response: params.env_response,
        }
    }
}

/// One organism, bound to a single lattice patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub x: u32,
    pub y: u32,
    pub genotype: Genotype,
    /// Current toxin-degradation rate. Sampled draws are clamped to [0, 1];
    /// signal-matching switches may leave this interval.
    pub phenotype: f64,
    /// Derived from the phenotype at birth and fixed for this agent instance;
    /// phenotype switches do not recompute it.
    pub growth_rate: f64,
    pub health: f64,
}

impl Agent {
    /// Creates an agent at (x, y) with a freshly sampled phenotype and full
    /// health. Used for founders and offspring alike; offspring pass their
    /// parent's genotype.
    pub fn spawn(
        x: u32,
        y: u32,
        genotype: Genotype,
        params: &SimParams,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let phenotype = draw_phenotype(
            rng,
            genotype.w0,
            genotype.m0,
            genotype.v0,
            genotype.m1,
            genotype.v1,
        )?;
        Ok(Agent {
            x,
            y,
            genotype,
            phenotype,
            growth_rate: growth_rate_for(phenotype, params),
            health: 1.0,
        })
    }
}

/// Reproduction probability as a monotonically decreasing function of
/// resistance: basal · (1 − trade_off · phenotype^alpha).
pub fn growth_rate_for(phenotype: f64, params: &SimParams) -> f64 {
    params.basal_growth_rate * (1.0 - params.trade_off * phenotype.powf(params.alpha))
}
