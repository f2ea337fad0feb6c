//! Core types for distributed evolution.
//!
//! This module defines the persisted records shared by the orchestrator and
//! the workers: generations, genomes, jobs and their parameters, plus the
//! error types raised at the store, worker, and orchestrator boundaries.

use commons_agents::genome::{GenomeError, WeightMap};
use commons_agents::policy::PolicyError;
use commons_core::error::CommonsError;
use commons_core::types::PopulationStrategy;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Monotonic generation number assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenerationId(pub i64);

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Unique identifier for a genome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenomeId(pub Uuid);

impl GenomeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GenomeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GenomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Active,
    Completed,
}

impl GenerationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Active => "active",
            GenerationStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(GenerationStatus::Active),
            "completed" => Some(GenerationStatus::Completed),
            _ => None,
        }
    }
}

/// Job lifecycle: `Pending → Processing → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Simulation parameters carried by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub resource_density: f64,
    pub agent_strategy: PopulationStrategy,
    pub max_ticks: u64,
    /// Cooperative share for mixed populations.
    #[serde(default = "default_mixed_ratio")]
    pub mixed_ratio: f64,
    /// Fixed world seed; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_mixed_ratio() -> f64 { 0.5 }

impl JobParams {
    /// Parameters for evaluating one genome.
    pub fn genetic(resource_density: f64, max_ticks: u64) -> Self {
        Self {
            resource_density,
            agent_strategy: PopulationStrategy::Genetic,
            max_ticks,
            mixed_ratio: default_mixed_ratio(),
            seed: None,
        }
    }
}

/// A unit of simulation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Genome under evaluation; `None` for plain strategy runs.
    pub genome_id: Option<GenomeId>,
    pub params: JobParams,
    pub assigned_to: Option<String>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
}

impl Job {
    /// A new pending job.
    pub fn new(genome_id: Option<GenomeId>, params: JobParams) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Pending,
            genome_id,
            params,
            assigned_to: None,
            started_at: None,
            completed_at: None,
            error: None,
            created_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub id: GenerationId,
    pub status: GenerationStatus,
    /// Set when the generation completes.
    pub avg_fitness: Option<f64>,
    pub best_fitness: Option<f64>,
    pub created_at: i64,
}

/// A persisted genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeRecord {
    pub id: GenomeId,
    pub generation_id: GenerationId,
    pub weights: WeightMap,
    /// 0.0 until evaluated.
    pub fitness_score: f64,
    /// Copied unchanged from the previous generation.
    pub is_elite: bool,
}

impl GenomeRecord {
    pub fn new(generation_id: GenerationId, weights: WeightMap) -> Self {
        Self {
            id: GenomeId::new(),
            generation_id,
            weights,
            fitness_score: 0.0,
            is_elite: false,
        }
    }

    pub fn elite(generation_id: GenerationId, weights: WeightMap) -> Self {
        Self {
            is_elite: true,
            ..Self::new(generation_id, weights)
        }
    }
}

/// Weights for a genome not yet assigned to a generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeSeed {
    pub weights: WeightMap,
    pub is_elite: bool,
}

impl GenomeSeed {
    pub fn new(weights: WeightMap) -> Self {
        Self {
            weights,
            is_elite: false,
        }
    }

    pub fn elite(weights: WeightMap) -> Self {
        Self {
            weights,
            is_elite: true,
        }
    }
}

/// Final statistics recorded when a generation is closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationClose {
    pub id: GenerationId,
    pub avg_fitness: f64,
    pub best_fitness: f64,
}

/// A freshly opened generation with its persisted genomes.
#[derive(Debug, Clone)]
pub struct GenerationPopulation {
    pub generation: Generation,
    pub genomes: Vec<GenomeRecord>,
}

/// Job counts per status for one generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobStatusCounts {
    /// Jobs that still block generation completion.
    pub fn outstanding(&self) -> usize {
        self.pending + self.processing
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }

    pub(crate) fn add(&mut self, status: JobStatus, count: usize) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

impl std::fmt::Display for JobStatusCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "pending={} processing={} completed={} failed={}",
            self.pending, self.processing, self.completed, self.failed
        )
    }
}

/// Errors raised by an [`EvolutionStore`](crate::store::EvolutionStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Generation {0} is no longer active")]
    GenerationNotActive(GenerationId),

    #[error("Generation {0} is already active")]
    ActiveGenerationExists(GenerationId),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while processing a job.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Could not load weights for genome {0}")]
    MissingGenome(GenomeId),

    #[error("Malformed genome weights: {0}")]
    Policy(#[from] PolicyError),

    #[error("Genome expects {found} inputs but the world produces {expected}")]
    IncompatibleGenome { expected: usize, found: usize },

    #[error("Simulation error: {0}")]
    Simulation(#[from] CommonsError),
}

/// Errors raised by the evolution orchestrator.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Genome recombination failed: {0}")]
    Genome(#[from] GenomeError),

    #[error("No active generation")]
    NoActiveGeneration,

    #[error("Generation {0} was closed by another orchestrator")]
    GenerationNotActive(GenerationId),

    #[error("Generation {0} has no genomes")]
    EmptyGeneration(GenerationId),

    #[error("Invalid evolution config: {0}")]
    InvalidConfig(String),
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_params_fill_optional_fields() {
        let params: JobParams = serde_json::from_str(
            r#"{"resource_density":0.2,"agent_strategy":"genetic","max_ticks":2000}"#,
        )
        .unwrap();
        assert_eq!(params, JobParams::genetic(0.2, 2000));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("lost"), None);
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn outstanding_counts_pending_and_processing() {
        let mut counts = JobStatusCounts::default();
        counts.add(JobStatus::Pending, 2);
        counts.add(JobStatus::Processing, 1);
        counts.add(JobStatus::Failed, 4);
        assert_eq!(counts.outstanding(), 3);
        assert_eq!(counts.total(), 7);
    }
}
