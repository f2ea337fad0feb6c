//! # Commons Agents
//!
//! The individuals of the simulation and the brains that drive them.
//!
//! - **Agent**: per-individual state (position, energy, strategy) and the
//!   feed / share / attack operations
//! - **Policy**: a small feed-forward network mapping an observation to
//!   action scores
//! - **Genome**: the policy's parameters as plain keyed arrays, with the
//!   mutation and uniform-crossover operators used by the evolution loop
//! - **Training**: reward shaping, experience replay, and the ε schedule
//!   for deep Q-learning

pub mod agent;
pub mod genome;
pub mod policy;
pub mod prelude;
pub mod training;
