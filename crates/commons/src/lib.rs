//! # Commons
//!
//! Evolving foraging policies on a scarce-resource grid world.
//!
//! Agents move over a square grid, eat a resource that is rescattered on a
//! fixed period, and interact with their neighbours: cooperative agents
//! share energy with the needy, aggressive agents steal it. A small neural
//! policy decides every action. Policies are evolved by a genetic
//! algorithm whose fitness function is the simulation itself.
//!
//! ## Quick Start
//!
//! ```rust
//! use commons::prelude::*;
//!
//! let config = WorldConfig {
//!     grid_size: 16,
//!     agent_count: 10,
//!     max_ticks: 100,
//!     ..WorldConfig::default()
//! };
//!
//! let result = EvaluationRun::new(config, 0.2, PopulationStrategy::Mixed)
//!     .with_mixed_ratio(0.5)
//!     .with_seed(Some(42))
//!     .execute()
//!     .unwrap();
//!
//! println!("survived {} ticks, fitness {:.1}", result.stats.ticks, result.fitness());
//! ```
//!
//! ## Architecture
//!
//! - [`commons_core`] - Shared types, world configuration, errors
//! - [`commons_agents`] - Agents, the policy network, genome operators
//! - [`commons_runtime`] - Grid world, metrics, evaluation runs
//! - `commons_distributed` - Store, job queue, workers, orchestrator
//!   (requires the `distributed` feature)
//!
//! ## Evolution Loop
//!
//! | Step | Component | What It Does |
//! |------|-----------|--------------|
//! | Seed | Orchestrator | Random genomes, one job each |
//! | Lease | JobQueue | One worker claims each pending job |
//! | Evaluate | Worker | Simulate, record fitness and time series |
//! | Breed | Orchestrator | Keep elites, crossover and mutate the top half |
//!
//! Policies can also be trained directly by deep Q-learning with
//! [`runtime::training::DqnTrainer`].

// Re-export all subcrates
pub use commons_agents as agents;
pub use commons_core as core;
pub use commons_runtime as runtime;

#[cfg(feature = "distributed")]
pub use commons_distributed as distributed;

/// Prelude module for convenient imports.
///
/// ```rust
/// use commons::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use commons_core::types::{
        Action, AgentId, GridPos, PopulationStrategy, Strategy, Tick, ACTION_COUNT,
    };
    pub use commons_core::config::WorldConfig;

    // Error types
    pub use commons_core::error::{CommonsError, Result};

    // Agents
    pub use commons_agents::agent::{Agent, Interaction};
    pub use commons_agents::genome::{crossover, mutate, GenomeError, WeightArray, WeightMap};
    pub use commons_agents::policy::{Policy, PolicyError};

    // Runtime
    pub use commons_runtime::evaluation::{BatchResult, EvaluationResult, EvaluationRun};
    pub use commons_runtime::metrics::{gini, RunStats, Snapshot};
    pub use commons_runtime::training::{DqnTrainer, EpisodeStats, TrainingConfig};
    pub use commons_runtime::world::{AgentStep, GridWorld, TickReport};

    // Distributed evolution (requires "distributed" feature)
    #[cfg(feature = "distributed")]
    pub use commons_distributed::{
        EvolutionConfig, EvolutionOrchestrator, EvolutionReport, EvolutionStore, Job, JobParams,
        JobQueue, SqliteStore, Worker, WorkerStep,
    };
}
