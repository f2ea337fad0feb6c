//! Evolution orchestrator: the generation lifecycle.
//!
//! ```text
//! no generation ──init──▶ active ──all jobs done──▶ completed
//!                           ▲                          │
//!                           └──── next generation ◀────┘
//! ```
//!
//! The orchestrator never runs simulations. It seeds a generation with
//! genomes and one job per genome, waits for the workers to drain those
//! jobs, then ranks the genomes by fitness and breeds the next generation
//! by elitism, uniform crossover, and Gaussian mutation.
//!
//! Several orchestrators may poll the same store. Each re-reads its tracked
//! generation before every completion check and follows a newer one if the
//! tracked generation was closed elsewhere.

use crate::store::EvolutionStore;
use crate::types::*;
use commons_agents::genome::{crossover, mutate};
use commons_agents::policy::{Policy, DEFAULT_HIDDEN_SIZE};
use commons_core::config::WorldConfig;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Genetic algorithm parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Genomes per generation (default: 50).
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Fraction of the ranked population copied unchanged (default: 0.20).
    #[serde(default = "default_elite_fraction")]
    pub elite_fraction: f64,
    /// Per-scalar mutation probability (default: 0.05).
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
    /// Standard deviation of mutation noise (default: 0.1).
    #[serde(default = "default_mutation_sigma")]
    pub mutation_sigma: f64,
    /// Tick ceiling for each evaluation (default: 2000).
    #[serde(default = "default_ticks_per_eval")]
    pub ticks_per_eval: u64,
    /// Resource density of evaluation worlds (default: 0.20).
    #[serde(default = "default_eval_resource_density")]
    pub eval_resource_density: f64,
    /// Hidden layer width of generation-zero policies (default: 128).
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    /// Seed for the breeding RNG; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_population_size() -> usize { 50 }
fn default_elite_fraction() -> f64 { 0.20 }
fn default_mutation_rate() -> f64 { 0.05 }
fn default_mutation_sigma() -> f64 { 0.1 }
fn default_ticks_per_eval() -> u64 { 2000 }
fn default_eval_resource_density() -> f64 { 0.20 }
fn default_hidden_size() -> usize { DEFAULT_HIDDEN_SIZE }

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            elite_fraction: default_elite_fraction(),
            mutation_rate: default_mutation_rate(),
            mutation_sigma: default_mutation_sigma(),
            ticks_per_eval: default_ticks_per_eval(),
            eval_resource_density: default_eval_resource_density(),
            hidden_size: default_hidden_size(),
            seed: None,
        }
    }
}

impl EvolutionConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        let invalid = |msg: String| Err(OrchestratorError::InvalidConfig(msg));
        if self.population_size == 0 {
            return invalid("population_size must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.elite_fraction) {
            return invalid(format!("elite_fraction {} outside [0, 1]", self.elite_fraction));
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return invalid(format!("mutation_rate {} outside [0, 1]", self.mutation_rate));
        }
        if self.mutation_sigma < 0.0 {
            return invalid(format!("mutation_sigma {} is negative", self.mutation_sigma));
        }
        if !(0.0..=1.0).contains(&self.eval_resource_density) {
            return invalid(format!(
                "eval_resource_density {} outside [0, 1]",
                self.eval_resource_density
            ));
        }
        if self.hidden_size == 0 {
            return invalid("hidden_size must be at least 1".into());
        }
        Ok(())
    }

    /// Number of genomes carried over unchanged.
    pub fn elite_count(&self) -> usize {
        (self.population_size as f64 * self.elite_fraction).floor() as usize
    }

    fn job_params(&self) -> JobParams {
        JobParams::genetic(self.eval_resource_density, self.ticks_per_eval)
    }
}

/// What one call to [`EvolutionOrchestrator::evolve_next_generation`] did.
#[derive(Debug, Clone)]
pub struct EvolutionReport {
    pub previous: GenerationId,
    pub next: GenerationId,
    pub avg_fitness: f64,
    pub best_fitness: f64,
    /// Elite records as inserted into the next generation.
    pub elites: Vec<GenomeRecord>,
    pub children: usize,
}

/// A generation with the status of its jobs.
#[derive(Debug, Clone)]
pub struct GenerationSummary {
    pub generation: Generation,
    pub jobs: JobStatusCounts,
}

pub struct EvolutionOrchestrator {
    store: Arc<dyn EvolutionStore>,
    config: EvolutionConfig,
    world: WorldConfig,
    current: Option<GenerationId>,
    rng: ChaCha12Rng,
}

impl EvolutionOrchestrator {
    pub fn new(
        store: Arc<dyn EvolutionStore>,
        config: EvolutionConfig,
        world: WorldConfig,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let seed = config.seed.unwrap_or_else(rand::random);
        Ok(Self {
            store,
            config,
            world,
            current: None,
            rng: ChaCha12Rng::seed_from_u64(seed),
        })
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Generation currently tracked, if one has been created or adopted.
    pub fn current_generation(&self) -> Option<GenerationId> {
        self.current
    }

    /// Create generation zero: randomly initialised genomes and one job each.
    ///
    /// Refused while another generation is active.
    pub fn init_generation_zero(&mut self) -> Result<GenerationId, OrchestratorError> {
        let seeds: Vec<GenomeSeed> = (0..self.config.population_size)
            .map(|_| {
                let policy = Policy::for_world(&self.world, self.config.hidden_size, &mut self.rng);
                GenomeSeed::new(policy.export_weights())
            })
            .collect();

        let opened = self
            .store
            .open_generation(None, &seeds, &self.config.job_params())?;
        let id = opened.generation.id;
        self.current = Some(id);
        info!(generation = %id, jobs = opened.genomes.len(), "initialised generation zero");
        Ok(id)
    }

    /// Whether every job of the tracked generation has finished.
    ///
    /// Re-reads the tracked generation first and adopts the most recent
    /// active one if it was closed elsewhere. Returns `false` when there is
    /// no generation, it has no genomes, or some genome has no job.
    pub fn check_generation_complete(&mut self) -> Result<bool, OrchestratorError> {
        let Some(generation) = self.refresh_current()? else {
            return Ok(false);
        };
        let genomes = self.store.genome_count(generation)?;
        if genomes == 0 {
            return Ok(false);
        }

        let counts = self.store.job_counts(generation)?;
        info!(generation = %generation, %counts, "generation status");
        Ok(counts.total() >= genomes && counts.outstanding() == 0)
    }

    /// Rank the tracked generation, close it, and breed the next one.
    ///
    /// Fails with [`OrchestratorError::GenerationNotActive`] when the tracked
    /// generation was already closed by another orchestrator; nothing is
    /// written and the next poll adopts the newer generation.
    pub fn evolve_next_generation(&mut self) -> Result<EvolutionReport, OrchestratorError> {
        let previous = match self.current {
            Some(id) => id,
            None => self
                .refresh_current()?
                .ok_or(OrchestratorError::NoActiveGeneration)?,
        };

        let mut ranked = self.store.genomes_for_generation(previous)?;
        if ranked.is_empty() {
            return Err(OrchestratorError::EmptyGeneration(previous));
        }
        ranked.sort_by(|a, b| b.fitness_score.total_cmp(&a.fitness_score));

        let best_fitness = ranked[0].fitness_score;
        let avg_fitness = ranked.iter().map(|g| g.fitness_score).sum::<f64>() / ranked.len() as f64;
        let population = self.config.population_size;

        let elite_count = self.config.elite_count().min(ranked.len()).min(population);
        let mut seeds: Vec<GenomeSeed> = ranked[..elite_count]
            .iter()
            .map(|g| GenomeSeed::elite(g.weights.clone()))
            .collect();

        let pool = &ranked[..(ranked.len() / 2).max(1)];
        while seeds.len() < population {
            let a = &pool[self.rng.random_range(0..pool.len())];
            let b = &pool[self.rng.random_range(0..pool.len())];
            let mut child = crossover(&a.weights, &b.weights, &mut self.rng)?;
            mutate(
                &mut child,
                self.config.mutation_rate,
                self.config.mutation_sigma,
                &mut self.rng,
            );
            seeds.push(GenomeSeed::new(child));
        }

        let close = GenerationClose {
            id: previous,
            avg_fitness,
            best_fitness,
        };
        let opened = match self
            .store
            .open_generation(Some(&close), &seeds, &self.config.job_params())
        {
            Ok(opened) => opened,
            Err(StoreError::GenerationNotActive(id)) => {
                warn!(generation = %id, "generation already closed elsewhere");
                self.current = None;
                return Err(OrchestratorError::GenerationNotActive(id));
            }
            Err(e) => return Err(e.into()),
        };
        let next = opened.generation.id;
        self.current = Some(next);

        info!(
            previous = %previous,
            next = %next,
            avg_fitness,
            best_fitness,
            elites = elite_count,
            jobs = seeds.len(),
            "evolved next generation"
        );
        let elites: Vec<GenomeRecord> = opened.genomes.into_iter().filter(|g| g.is_elite).collect();
        Ok(EvolutionReport {
            previous,
            next,
            avg_fitness,
            best_fitness,
            children: seeds.len() - elites.len(),
            elites,
        })
    }

    /// One poll: evolve if the tracked generation is complete.
    pub fn step(&mut self) -> Result<Option<EvolutionReport>, OrchestratorError> {
        if self.check_generation_complete()? {
            self.evolve_next_generation().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Poll forever, or until `max_generations` new generations were bred.
    /// Errors are logged and polling continues.
    pub fn run_loop(&mut self, poll_interval: Duration, max_generations: Option<u64>) {
        info!(poll = ?poll_interval, "orchestrator loop started");
        let mut bred = 0u64;
        loop {
            match self.step() {
                Ok(Some(report)) => {
                    bred += 1;
                    if max_generations.is_some_and(|max| bred >= max) {
                        info!(generation = %report.next, "generation limit reached");
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "orchestrator step failed"),
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Every generation with its job counts, oldest first.
    pub fn status(&self) -> Result<Vec<GenerationSummary>, OrchestratorError> {
        let generations = self.store.list_generations()?;
        generations
            .into_iter()
            .map(|generation| {
                let jobs = self.store.job_counts(generation.id)?;
                Ok(GenerationSummary { generation, jobs })
            })
            .collect()
    }

    /// The tracked generation if it is still active, else the most recent
    /// active one.
    fn refresh_current(&mut self) -> Result<Option<GenerationId>, OrchestratorError> {
        if let Some(id) = self.current {
            match self.store.get_generation(id)? {
                Some(generation) if generation.status == GenerationStatus::Active => {
                    return Ok(Some(id));
                }
                _ => {
                    info!(generation = %id, "tracked generation closed elsewhere");
                    self.current = None;
                }
            }
        }
        self.current = self.store.latest_active_generation()?.map(|g| g.id);
        if let Some(id) = self.current {
            info!(generation = %id, "adopted active generation");
        }
        Ok(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_tuned_values() {
        let config = EvolutionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.elite_count(), 10);
        assert_eq!(config.job_params().agent_strategy, commons_core::types::PopulationStrategy::Genetic);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = EvolutionConfig {
            elite_fraction: 1.5,
            ..EvolutionConfig::default()
        };
        assert!(matches!(config.validate(), Err(OrchestratorError::InvalidConfig(_))));
    }
}
