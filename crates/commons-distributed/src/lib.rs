//! # Commons Distributed
//!
//! Distributed evolution: an orchestrator breeds generations of policy
//! genomes, and any number of independent worker processes evaluate them,
//! coordinating only through a shared SQLite database.
//!
//! - **Store**: persisted generations, genomes, jobs, and run results
//! - **JobQueue**: lease with at-most-one-claim semantics, terminal
//!   transitions
//! - **Worker**: lease, simulate, report fitness
//! - **EvolutionOrchestrator**: elitism, crossover, and mutation across
//!   generations

pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod types;
pub mod worker;

pub use orchestrator::{EvolutionConfig, EvolutionOrchestrator, EvolutionReport, GenerationSummary};
pub use queue::JobQueue;
pub use store::{EvolutionStore, SqliteStore};
pub use types::*;
pub use worker::{Worker, WorkerStep, DEFAULT_IDLE_BACKOFF};
