//! Commons Runtime Prelude: convenient imports for common usage.
//!
//! ```rust
//! use commons_runtime::prelude::*;
//! ```

pub use crate::world::{AgentStep, GridWorld, TickReport};

pub use crate::metrics::{gini, RunStats, Snapshot};

pub use crate::evaluation::{BatchResult, EvaluationResult, EvaluationRun, SIMULATION_VERSION};

pub use crate::training::{DqnTrainer, EpisodeStats, TrainingConfig};
