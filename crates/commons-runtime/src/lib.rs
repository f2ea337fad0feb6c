//! # Commons Runtime
//!
//! The world the agents live in, and the runs that turn it into a fitness
//! function.
//!
//! - **GridWorld**: resource and occupancy grids, the tick loop, periodic
//!   resource respawn and snapshots
//! - **Metrics**: Gini coefficient over live energies, population snapshots
//! - **EvaluationRun**: one seeded simulation of a population, reporting
//!   fitness and a persistable batch result
//! - **DqnTrainer**: deep Q-learning over recorded world turns

pub mod evaluation;
pub mod metrics;
pub mod prelude;
pub mod training;
pub mod world;
