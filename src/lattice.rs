use crate::sim_params::PulseRect;
use rand::prelude::*;

/// One lattice site. `resident` is the index of the occupying agent in the
/// population vector; it is exact at tick boundaries and treated as a plain
/// occupancy flag while a tick's population update is in flight (the driver
/// reindexes it when the next generation is committed).
#[derive(Debug, Clone)]
pub struct Patch {
    pub x: u32,
    pub y: u32,
    pub toxin: f64,
    pub signal: f64,
    pub resident: Option<usize>,
}

/// Fixed-size 2-D lattice stored as a single flat row-major buffer.
#[derive(Debug, Clone)]
pub struct Lattice {
    width: u32,
    height: u32,
    pub patches: Vec<Patch>,
}

impl Lattice {
    /// Creates a lattice of `width` × `height` patches with no toxin, no
    /// signal, and no residents. Dimensions are validated by the
    /// configuration layer before construction.
    pub fn new(width: u32, height: u32) -> Self {
        let mut patches = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                patches.push(Patch {
                    x,
                    y,
                    toxin: 0.0,
                    signal: 0.0,
                    resident: None,
                });
            }
        }
        Lattice {
            width,
            height,
            patches,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    pub fn index_of(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    pub fn patch(&self, x: u32, y: u32) -> &Patch {
        &self.patches[self.index_of(x, y)]
    }

    pub fn patch_mut(&mut self, x: u32, y: u32) -> &mut Patch {
        let idx = self.index_of(x, y);
        &mut self.patches[idx]
    }

    /// Adds `amount` of toxin to every patch inside the inclusive rectangle.
    pub fn pulse(&mut self, rect: &PulseRect, amount: f64) {
        for y in rect.min_y..=rect.max_y {
            for x in rect.min_x..=rect.max_x {
                let idx = self.index_of(x, y);
                self.patches[idx].toxin += amount;
            }
        }
    }

    /// Recomputes every patch's signal as its toxin perturbed by noise
    /// uniform over [−noise/2, +noise/2]. Runs before any toxin mutation in
    /// the tick, so agents observe the previous tick's post-diffusion level.
    pub fn compute_signals(&mut self, rng: &mut impl Rng, noise: f64) {
        for patch in &mut self.patches {
            patch.signal = patch.toxin + rng.random::<f64>() * noise - 0.5 * noise;
        }
    }

    /// Diffuses toxin between each patch and its Moore neighbors.
    ///
    /// Patches are visited in a freshly shuffled order and each patch's
    /// targets are shuffled too: the update runs against the live grid rather
    /// than a double-buffered snapshot, so iteration order matters, and the
    /// per-tick shuffles average that dependence out over a run. Each
    /// transfer moves (source_toxin / 9) · rate regardless of how many
    /// neighbors the source actually has; edge and corner patches therefore
    /// export less than interior ones and retain the remainder.
    pub fn diffuse(&mut self, rng: &mut impl Rng, rate: f64) {
        let mut order: Vec<usize> = (0..self.patches.len()).collect();
        order.shuffle(rng);

        for source_idx in order {
            let (x, y) = (self.patches[source_idx].x, self.patches[source_idx].y);
            let source_toxin = self.patches[source_idx].toxin;
            let per_target = (source_toxin / 9.0) * rate;

            let mut targets = self.moore_neighbors(x, y);
            targets.shuffle(rng);
            for target_idx in targets {
                self.patches[target_idx].toxin += per_target;
                self.patches[source_idx].toxin -= per_target;
            }
        }
    }

    /// Indices of the up-to-8 Moore neighbors of (x, y). No wraparound; the
    /// patch itself is excluded.
    pub fn moore_neighbors(&self, x: u32, y: u32) -> Vec<usize> {
        let mut neighbors = Vec::with_capacity(8);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx >= 0 && nx < self.width as i64 && ny >= 0 && ny < self.height as i64 {
                    neighbors.push(self.index_of(nx as u32, ny as u32));
                }
            }
        }
        neighbors
    }

    /// Moore neighbors of (x, y) that currently hold no agent.
    pub fn free_moore_neighbors(&self, x: u32, y: u32) -> Vec<usize> {
        self.moore_neighbors(x, y)
            .into_iter()
            .filter(|&idx| self.patches[idx].resident.is_none())
            .collect()
    }

    /// Total toxin mass across the lattice.
    pub fn total_toxin(&self) -> f64 {
        self.patches.iter().map(|p| p.toxin).sum()
    }
}
