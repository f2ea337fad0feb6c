//! Commons Agents Prelude: convenient imports for common usage.

pub use crate::agent::{Agent, Interaction};
pub use crate::genome::{crossover, mutate, GenomeError, WeightArray, WeightMap};
pub use crate::policy::{Adam, Policy, PolicyError, QTarget};
pub use crate::training::{EpsilonSchedule, ReplayBuffer, RewardFunction, StepOutcome, Transition};
