//! Evaluation runs: one full simulation used as a fitness measurement.

use crate::metrics::{RunStats, Snapshot};
use crate::world::{GridWorld, TickReport};
use commons_agents::policy::Policy;
use commons_core::config::WorldConfig;
use commons_core::error::Result;
use commons_core::types::PopulationStrategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Version tag written with every batch result.
pub const SIMULATION_VERSION: &str = "v2.0-genetic";

/// Weight of the final mean energy in the fitness score.
pub const ENERGY_FITNESS_WEIGHT: f64 = 0.1;

/// A configured, not yet executed simulation run.
#[derive(Debug, Clone)]
pub struct EvaluationRun {
    config: WorldConfig,
    resource_density: f64,
    population: PopulationStrategy,
    mixed_ratio: f64,
    seed: Option<u64>,
    policy: Option<Arc<Policy>>,
}

impl EvaluationRun {
    pub fn new(config: WorldConfig, resource_density: f64, population: PopulationStrategy) -> Self {
        Self {
            config,
            resource_density,
            population,
            mixed_ratio: 0.5,
            seed: None,
            policy: None,
        }
    }

    /// Cooperative share of a [`PopulationStrategy::Mixed`] population.
    pub fn with_mixed_ratio(mut self, ratio: f64) -> Self {
        self.mixed_ratio = ratio;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Policy bound to every policy-driven agent.
    pub fn with_policy(mut self, policy: Arc<Policy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.config.max_ticks = max_ticks;
        self
    }

    pub fn execute(&self) -> Result<EvaluationResult> {
        self.execute_with(|_| {})
    }

    /// Execute, calling `on_tick` after every tick.
    pub fn execute_with(&self, on_tick: impl FnMut(&TickReport)) -> Result<EvaluationResult> {
        let mut world = match self.seed {
            Some(seed) => GridWorld::with_seed(self.config.clone(), seed)?,
            None => GridWorld::new(self.config.clone())?,
        };
        if let Some(policy) = &self.policy {
            world.bind_policy(Arc::clone(policy));
        }
        world.reset(self.resource_density, self.population, self.mixed_ratio)?;

        let stats = world.run_with(on_tick);
        let result = EvaluationResult {
            simulation_id: Uuid::new_v4(),
            population: self.population,
            resource_density: self.resource_density,
            seed: world.seed(),
            stats,
            snapshots: world.take_snapshots(),
        };

        info!(
            simulation = %result.simulation_id,
            population = %self.population,
            density = self.resource_density,
            ticks = stats.ticks,
            fitness = result.fitness(),
            "evaluation finished"
        );
        Ok(result)
    }
}

/// Outcome of an [`EvaluationRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub simulation_id: Uuid,
    pub population: PopulationStrategy,
    pub resource_density: f64,
    /// Seed the world actually ran with.
    pub seed: u64,
    pub stats: RunStats,
    pub snapshots: Vec<Snapshot>,
}

impl EvaluationResult {
    /// `ticks + 0.1 × mean final energy of survivors`.
    pub fn fitness(&self) -> f64 {
        self.stats.ticks as f64 + ENERGY_FITNESS_WEIGHT * self.stats.avg_energy
    }

    pub fn batch_result(&self, machine_id: &str) -> BatchResult {
        BatchResult {
            simulation_id: self.simulation_id,
            machine_id: machine_id.to_string(),
            agent_strategy: self.population.label().to_string(),
            resource_density: self.resource_density,
            total_ticks_survived: self.stats.ticks,
            avg_agent_energy: self.stats.avg_energy,
            simulation_version: SIMULATION_VERSION.to_string(),
        }
    }
}

/// Summary row persisted for every completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub simulation_id: Uuid,
    pub machine_id: String,
    pub agent_strategy: String,
    pub resource_density: f64,
    pub total_ticks_survived: u64,
    pub avg_agent_energy: f64,
    pub simulation_version: String,
}
