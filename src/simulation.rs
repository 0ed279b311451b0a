use crate::config::SimulationConfig;
use crate::lattice::Lattice;
use crate::population::{Agent, Genotype};
use crate::sampler::draw_phenotype;
use crate::sim_params::{SimParams, DIFFUSION_RATE};
use anyhow::Result;
use log::{debug, warn};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// One cell of the per-tick grid snapshot emitted by the driver.
/// `toxin` is the level after the tick's pulse and before the population
/// update; `degrade_rate` is 0.0 for unoccupied patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tick: u32,
    pub x: u32,
    pub y: u32,
    pub agent_here: u8,
    pub toxin: f64,
    pub degrade_rate: f64,
}

/// Owns the lattice, the population, and the single RNG stream, and runs the
/// fixed per-tick update pipeline.
pub struct Simulation {
    pub params: SimParams,
    pub lattice: Lattice,
    pub agents: Vec<Agent>,
    /// The one seeded RNG every stochastic decision draws from, in tick
    /// order; reproducibility of a run depends on that order staying fixed.
    pub rng: StdRng,
    pub current_tick: u32,
}

impl Simulation {
    /// Validates the configuration, seeds the RNG, builds the lattice, and
    /// places the founder population at uniformly random unoccupied patches
    /// (redrawing on collision; validation caps the population at the
    /// lattice area, so the redraw terminates).
    pub fn new(config: &SimulationConfig) -> Result<Self> {
        config.validate()?;
        let params = config.resolve_params();
        let mut rng = StdRng::seed_from_u64(params.seed as u64);
        let mut lattice = Lattice::new(params.width, params.height);

        let founder = Genotype::founder(&params);
        let mut agents = Vec::with_capacity(params.init_pop_size as usize);
        for _ in 0..params.init_pop_size {
            let (x, y) = loop {
                let rx = rng.random_range(0..params.width);
                let ry = rng.random_range(0..params.height);
                if lattice.patch(rx, ry).resident.is_none() {
                    break (rx, ry);
                }
            };
            let agent = Agent::spawn(x, y, founder, &params, &mut rng)?;
            let idx = lattice.index_of(x, y);
            lattice.patches[idx].resident = Some(agents.len());
            agents.push(agent);
        }

        Ok(Self {
            params,
            lattice,
            agents,
            rng,
            current_tick: 0,
        })
    }

    /// Advances the simulation by one tick and returns the tick's grid
    /// snapshot.
    ///
    /// Fixed order: signal → pulse → observe → switching → toxin/health →
    /// reproduction → diffusion → replacement → dilution.
    pub fn tick(&mut self) -> Result<Vec<Observation>> {
        self.lattice
            .compute_signals(&mut self.rng, self.params.env_noise);

        if self.current_tick % self.params.pulse_ticks == 0 {
            self.lattice.pulse(&self.params.pulse, self.params.toxin_conc);
        }

        let observations = self.observe();

        self.switch_phenotypes()?;
        let alive = self.apply_toxin();
        let deaths = alive.iter().filter(|survived| !**survived).count();
        let offspring = self.reproduce(&alive)?;
        let births = offspring.len();

        self.lattice.diffuse(&mut self.rng, DIFFUSION_RATE);

        self.commit_generation(&alive, offspring);
        self.dilute();

        debug!(
            "Tick {} | population: {} | births: {} | deaths: {} | mean phenotype: {:.4} | total toxin: {:.3}",
            self.current_tick,
            self.agents.len(),
            births,
            deaths,
            self.mean_phenotype(),
            self.lattice.total_toxin()
        );
        if self.agents.is_empty() && deaths > 0 {
            warn!("Population went extinct at tick {}.", self.current_tick);
        }

        self.current_tick += 1;
        Ok(observations)
    }

    /// Number of living agents.
    pub fn population_size(&self) -> usize {
        self.agents.len()
    }

    /// Mean degradation rate across the population, 0.0 when extinct.
    pub fn mean_phenotype(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        self.agents.iter().map(|a| a.phenotype).sum::<f64>() / self.agents.len() as f64
    }

    /// One record per patch in row-major order (x outer, y inner).
    fn observe(&self) -> Vec<Observation> {
        let mut records = Vec::with_capacity(self.lattice.area());
        for x in 0..self.lattice.width() {
            for y in 0..self.lattice.height() {
                let patch = self.lattice.patch(x, y);
                let resident = patch.resident.and_then(|i| self.agents.get(i));
                records.push(Observation {
                    tick: self.current_tick,
                    x,
                    y,
                    agent_here: resident.is_some() as u8,
                    toxin: patch.toxin,
                    degrade_rate: resident.map_or(0.0, |a| a.phenotype),
                });
            }
        }
        records
    }

    /// Each agent switches phenotype with its genotype's probability: either
    /// adopting the local signal verbatim (plasticity; the signal is noise-
    /// perturbed and deliberately not clamped to [0, 1]) or resampling from
    /// its own mixture. The stored growth rate is left untouched either way.
    fn switch_phenotypes(&mut self) -> Result<()> {
        for i in 0..self.agents.len() {
            let genotype = self.agents[i].genotype;
            if self.rng.random::<f64>() < genotype.switch_rate {
                if self.rng.random::<f64>() < genotype.env_response {
                    let (x, y) = (self.agents[i].x, self.agents[i].y);
                    self.agents[i].phenotype = self.lattice.patch(x, y).signal;
                } else {
                    self.agents[i].phenotype = draw_phenotype(
                        &mut self.rng,
                        genotype.w0,
                        genotype.m0,
                        genotype.v0,
                        genotype.m1,
                        genotype.v1,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Applies toxin damage and degradation patch by patch. Returns one
    /// survival flag per agent in population order. Toxin at or above
    /// epsilon damages; below it the agent recovers to full health
    /// instantly. Survivors degrade their patch by their phenotype, with the
    /// level snapped to exactly 0.0 once it falls to epsilon or below. The
    /// dead have their patch occupancy cleared immediately, freeing it for
    /// this tick's reproduction.
    fn apply_toxin(&mut self) -> Vec<bool> {
        let epsilon = self.params.epsilon;
        let mut alive = vec![false; self.agents.len()];
        for (i, agent) in self.agents.iter_mut().enumerate() {
            let patch = self.lattice.patch_mut(agent.x, agent.y);
            if patch.toxin >= epsilon {
                agent.health -= patch.toxin;
            } else {
                agent.health = 1.0;
            }
            if agent.health >= epsilon {
                alive[i] = true;
                if patch.toxin > epsilon {
                    patch.toxin -= agent.phenotype;
                }
                if patch.toxin <= epsilon {
                    patch.toxin = 0.0;
                }
            } else {
                patch.resident = None;
            }
        }
        alive
    }

    /// Rolls reproduction for every agent that survived this tick's health
    /// step, in population order. A successful roll places one offspring at
    /// a uniformly chosen free Moore neighbor (if any): genotype copied from
    /// the parent, phenotype drawn fresh, growth rate recomputed, health
    /// 1.0. Offspring join the next generation only; they neither reproduce
    /// nor face toxin this tick.
    fn reproduce(&mut self, alive: &[bool]) -> Result<Vec<Agent>> {
        let survivor_count = alive.iter().filter(|survived| **survived).count();
        let mut offspring: Vec<Agent> = Vec::new();
        for i in 0..self.agents.len() {
            if !alive[i] {
                continue;
            }
            let (x, y, growth_rate, genotype) = {
                let parent = &self.agents[i];
                (parent.x, parent.y, parent.growth_rate, parent.genotype)
            };
            if self.rng.random::<f64>() < growth_rate {
                let free = self.lattice.free_moore_neighbors(x, y);
                if let Some(&target) = free.choose(&mut self.rng) {
                    let (tx, ty) = (self.lattice.patches[target].x, self.lattice.patches[target].y);
                    let child = Agent::spawn(tx, ty, genotype, &self.params, &mut self.rng)?;
                    // Mark occupancy now so later parents cannot pick the same
                    // patch; the index is the child's slot in the next
                    // generation (survivors first, then offspring).
                    self.lattice.patches[target].resident =
                        Some(survivor_count + offspring.len());
                    offspring.push(child);
                }
            }
        }
        Ok(offspring)
    }

    /// Survivors plus this tick's offspring become the population, and every
    /// patch's resident index is rebuilt against the new vector.
    fn commit_generation(&mut self, alive: &[bool], offspring: Vec<Agent>) {
        let current = std::mem::take(&mut self.agents);
        let mut next = Vec::with_capacity(current.len() + offspring.len());
        for (agent, &survived) in current.into_iter().zip(alive) {
            if survived {
                next.push(agent);
            }
        }
        next.extend(offspring);
        self.agents = next;
        self.reindex_residents();
    }

    /// Once the population has filled the lattice, keeps a random
    /// floor(population / dilute_rate) of it and clears the occupancy of the
    /// discarded. A no-op while the population is below the lattice area.
    fn dilute(&mut self) {
        if self.agents.len() < self.lattice.area() {
            return;
        }
        let keep = self.agents.len() / self.params.dilute_rate as usize;
        self.agents.shuffle(&mut self.rng);
        for agent in &self.agents[keep..] {
            let idx = self.lattice.index_of(agent.x, agent.y);
            self.lattice.patches[idx].resident = None;
        }
        self.agents.truncate(keep);
        self.reindex_residents();
        debug!("Diluted population to {} agents.", keep);
    }

    fn reindex_residents(&mut self) {
        for (i, agent) in self.agents.iter().enumerate() {
            let idx = self.lattice.index_of(agent.x, agent.y);
            self.lattice.patches[idx].resident = Some(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::population::growth_rate_for;

    /// Small-world config with the pulse rectangle shrunk to fit; the
    /// defaults target a 50x50 lattice.
    fn test_config(width: u32, height: u32, init_pop_size: u32, seed: i64) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.lattice.width = width;
        config.lattice.height = height;
        config.population.init_pop_size = init_pop_size;
        config.toxin.pulse_min_x = 0;
        config.toxin.pulse_max_x = width - 1;
        config.toxin.pulse_min_y = 0;
        config.toxin.pulse_max_y = height - 1;
        config.run.seed = Some(seed);
        config
    }

    /// The patch/agent relation must agree in both directions: every
    /// resident index points at an agent on that patch, and every agent's
    /// patch points back at it.
    fn assert_consistent(sim: &Simulation) {
        let mut occupied = 0;
        for patch in &sim.lattice.patches {
            if let Some(i) = patch.resident {
                let agent = sim
                    .agents
                    .get(i)
                    .unwrap_or_else(|| panic!("stale resident index {} at ({}, {})", i, patch.x, patch.y));
                assert_eq!((agent.x, agent.y), (patch.x, patch.y));
                occupied += 1;
            }
        }
        assert_eq!(occupied, sim.agents.len(), "occupancy count mismatch");
        for (i, agent) in sim.agents.iter().enumerate() {
            assert_eq!(sim.lattice.patch(agent.x, agent.y).resident, Some(i));
        }
    }

    fn lone_agent(sim: &mut Simulation, x: u32, y: u32, phenotype: f64) {
        let genotype = Genotype::founder(&sim.params);
        sim.agents.push(Agent {
            x,
            y,
            genotype,
            phenotype,
            growth_rate: growth_rate_for(phenotype, &sim.params),
            health: 1.0,
        });
        let idx = sim.lattice.index_of(x, y);
        sim.lattice.patches[idx].resident = Some(0);
    }

    #[test]
    fn initial_placement_is_consistent() {
        let sim = Simulation::new(&test_config(6, 4, 15, 5)).unwrap();
        assert_eq!(sim.population_size(), 15);
        assert_consistent(&sim);
    }

    #[test]
    fn initial_placement_can_fill_the_lattice() {
        // Exercises the redraw loop hard: the last founder has one free patch.
        let sim = Simulation::new(&test_config(3, 3, 9, 6)).unwrap();
        assert_eq!(sim.population_size(), 9);
        assert!(sim.lattice.patches.iter().all(|p| p.resident.is_some()));
        assert_consistent(&sim);
    }

    #[test]
    fn consistency_holds_across_ticks() {
        let mut sim = Simulation::new(&test_config(8, 8, 12, 7)).unwrap();
        for _ in 0..20 {
            sim.tick().unwrap();
            assert_consistent(&sim);
            assert!(sim.population_size() <= sim.lattice.area());
            for patch in &sim.lattice.patches {
                assert!(patch.toxin >= 0.0);
            }
        }
    }

    #[test]
    fn same_seed_reproduces_the_observation_stream() {
        let config = test_config(8, 8, 10, 42);
        let mut first = Simulation::new(&config).unwrap();
        let mut second = Simulation::new(&config).unwrap();
        for _ in 0..15 {
            assert_eq!(first.tick().unwrap(), second.tick().unwrap());
        }
        assert_eq!(first.population_size(), second.population_size());
    }

    #[test]
    fn observations_are_row_major_x_outer() {
        let mut sim = Simulation::new(&test_config(2, 3, 0, 8)).unwrap();
        let coords: Vec<(u32, u32)> = sim
            .tick()
            .unwrap()
            .iter()
            .map(|obs| (obs.x, obs.y))
            .collect();
        assert_eq!(coords, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
    }

    #[test]
    fn pulse_every_tick_shows_full_concentration_at_tick_zero() {
        let mut config = test_config(2, 2, 0, 9);
        config.toxin.toxin_conc = 5.0;
        config.toxin.pulse_ticks = 1;
        let mut sim = Simulation::new(&config).unwrap();
        let observations = sim.tick().unwrap();
        assert_eq!(observations.len(), 4);
        for obs in &observations {
            assert_eq!(obs.toxin, 5.0);
            assert_eq!(obs.agent_here, 0);
            assert_eq!(obs.degrade_rate, 0.0);
        }
    }

    #[test]
    fn forced_reproduction_fills_exactly_one_free_neighbor() {
        let mut sim = Simulation::new(&test_config(3, 1, 0, 10)).unwrap();
        lone_agent(&mut sim, 1, 0, 0.0); // phenotype 0 → growth rate 1.0
        assert_eq!(sim.agents[0].growth_rate, 1.0);

        let offspring = sim.reproduce(&[true]).unwrap();
        assert_eq!(offspring.len(), 1);
        sim.commit_generation(&[true], offspring);

        assert_eq!(sim.population_size(), 2);
        let ends = [
            sim.lattice.patch(0, 0).resident.is_some(),
            sim.lattice.patch(2, 0).resident.is_some(),
        ];
        assert_eq!(ends.iter().filter(|occupied| **occupied).count(), 1);
        assert_consistent(&sim);
    }

    #[test]
    fn surrounded_agent_cannot_reproduce() {
        let mut sim = Simulation::new(&test_config(1, 1, 0, 11)).unwrap();
        lone_agent(&mut sim, 0, 0, 0.0);
        let offspring = sim.reproduce(&[true]).unwrap();
        assert!(offspring.is_empty());
    }

    #[test]
    fn lethal_toxin_kills_and_clears_occupancy() {
        let mut config = test_config(2, 2, 0, 12);
        config.run.epsilon = 1e-4;
        let mut sim = Simulation::new(&config).unwrap();
        lone_agent(&mut sim, 0, 0, 0.5);
        sim.lattice.patch_mut(0, 0).toxin = 2.0;

        let alive = sim.apply_toxin();
        assert_eq!(alive, vec![false]);
        assert!(sim.agents[0].health < 1e-4);
        assert!(sim.lattice.patch(0, 0).resident.is_none());

        sim.commit_generation(&alive, Vec::new());
        assert_eq!(sim.population_size(), 0);
        assert_consistent(&sim);
    }

    #[test]
    fn survivor_degrades_toxin_and_level_snaps_to_zero() {
        let mut sim = Simulation::new(&test_config(2, 2, 0, 13)).unwrap();
        lone_agent(&mut sim, 0, 0, 0.6);
        sim.lattice.patch_mut(0, 0).toxin = 0.5;

        let alive = sim.apply_toxin();
        assert_eq!(alive, vec![true]);
        assert!((sim.agents[0].health - 0.5).abs() < 1e-12);
        // 0.5 - 0.6 falls below epsilon and is snapped to exactly zero.
        assert_eq!(sim.lattice.patch(0, 0).toxin, 0.0);
    }

    #[test]
    fn toxin_free_patch_restores_full_health() {
        let mut sim = Simulation::new(&test_config(2, 2, 0, 14)).unwrap();
        lone_agent(&mut sim, 1, 1, 0.3);
        sim.agents[0].health = 0.3;

        let alive = sim.apply_toxin();
        assert_eq!(alive, vec![true]);
        assert_eq!(sim.agents[0].health, 1.0);
    }

    #[test]
    fn dilution_below_capacity_is_a_noop() {
        let mut sim = Simulation::new(&test_config(4, 4, 3, 15)).unwrap();
        let before: Vec<(u32, u32)> = sim.agents.iter().map(|a| (a.x, a.y)).collect();
        sim.dilute();
        let after: Vec<(u32, u32)> = sim.agents.iter().map(|a| (a.x, a.y)).collect();
        assert_eq!(before, after);
        assert_consistent(&sim);
    }

    #[test]
    fn dilution_thins_a_saturated_lattice() {
        let mut config = test_config(2, 2, 4, 16);
        config.population.dilute_rate = 2;
        let mut sim = Simulation::new(&config).unwrap();
        assert_eq!(sim.population_size(), 4);

        sim.dilute();
        assert_eq!(sim.population_size(), 2);
        assert!(sim.population_size() <= sim.lattice.area());
        assert_consistent(&sim);
    }

    #[test]
    fn switching_to_signal_leaves_growth_rate_untouched() {
        // Growth rate is derived from the phenotype only at birth, so a
        // switched agent keeps the rate it was born with; only its offspring
        // recompute theirs.
        let mut sim = Simulation::new(&test_config(2, 2, 0, 17)).unwrap();
        lone_agent(&mut sim, 0, 0, 0.2);
        sim.agents[0].genotype.switch_rate = 1.0;
        sim.agents[0].genotype.env_response = 1.0;
        let born_with = sim.agents[0].growth_rate;

        // The signal is unclamped noise around toxin and may leave [0, 1];
        // a matching switch adopts it verbatim.
        sim.lattice.patch_mut(0, 0).signal = 1.7;
        sim.switch_phenotypes().unwrap();

        assert_eq!(sim.agents[0].phenotype, 1.7);
        assert_eq!(sim.agents[0].growth_rate, born_with);
    }

    #[test]
    fn resampling_switch_stays_in_unit_interval() {
        let mut sim = Simulation::new(&test_config(2, 2, 0, 18)).unwrap();
        lone_agent(&mut sim, 0, 0, 0.2);
        sim.agents[0].genotype.switch_rate = 1.0;
        sim.agents[0].genotype.env_response = 0.0;

        for _ in 0..50 {
            sim.switch_phenotypes().unwrap();
            let p = sim.agents[0].phenotype;
            assert!((0.0..=1.0).contains(&p), "sampled phenotype {}", p);
        }
    }
}
