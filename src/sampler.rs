use anyhow::Result;
use rand::prelude::*;
use rand_distr::{Distribution, Gamma};

/// Draws a toxin-degradation phenotype from a two-component gamma mixture.
///
/// With probability `w0` the draw comes from the component with mean `m0` and
/// variance `v0`, otherwise from (`m1`, `v1`). Each component is
/// re-parameterized per draw as shape = mean²/variance, scale =
/// variance/mean, which preserves the requested mean. The result is
/// hard-clamped to [0, 1]: the underlying distribution is unbounded above and
/// values past the unit interval are pinned to it, not rejected.
pub fn draw_phenotype(
    rng: &mut impl Rng,
    w0: f64,
    m0: f64,
    v0: f64,
    m1: f64,
    v1: f64,
) -> Result<f64> {
    let (mean, variance) = if rng.random::<f64>() < w0 {
        (m0, v0)
    } else {
        (m1, v1)
    };

    let shape = mean * mean / variance;
    let scale = variance / mean;
    let gamma = Gamma::new(shape, scale)
        .map_err(|e| anyhow::anyhow!("Invalid gamma parameters (mean {}, variance {}): {}", mean, variance, e))?;

    Ok(gamma.sample(rng).clamp(0.0, 1.0))
}
