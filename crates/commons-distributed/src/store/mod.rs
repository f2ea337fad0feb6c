//! Persistent evolution state.
//!
//! Generations, genomes, jobs, and run results live behind the
//! [`EvolutionStore`] trait. The orchestrator and every worker receive a
//! handle explicitly; several processes may open the same SQLite file.
//!
//! Two operations are atomic across processes. [`EvolutionStore::try_claim_job`]
//! is a conditional write that succeeds for exactly one caller, and
//! [`EvolutionStore::open_generation`] closes one generation and writes the
//! next with all its genomes and jobs in a single transaction, so at most one
//! generation is ever active.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::types::*;
use commons_runtime::evaluation::BatchResult;
use commons_runtime::metrics::Snapshot;
use uuid::Uuid;

/// Storage backend for generations, genomes, jobs, and run results.
pub trait EvolutionStore: Send + Sync {
    // --- generations ---

    /// Insert a new active generation with the next id.
    fn create_generation(&self) -> StoreResult<Generation>;

    fn get_generation(&self, id: GenerationId) -> StoreResult<Option<Generation>>;

    /// The most recently created generation still active.
    fn latest_active_generation(&self) -> StoreResult<Option<Generation>>;

    /// All generations, oldest first.
    fn list_generations(&self) -> StoreResult<Vec<Generation>>;

    /// Open a new active generation with its genomes and one pending job
    /// per genome, all in one transaction.
    ///
    /// With `close`, that generation is completed in the same transaction
    /// and must still be active, otherwise nothing is written and
    /// [`StoreError::GenerationNotActive`] is returned. Without it, no
    /// generation may be active ([`StoreError::ActiveGenerationExists`]).
    fn open_generation(
        &self,
        close: Option<&GenerationClose>,
        genomes: &[GenomeSeed],
        params: &JobParams,
    ) -> StoreResult<GenerationPopulation>;

    // --- genomes ---

    fn insert_genomes(&self, genomes: &[GenomeRecord]) -> StoreResult<()>;

    fn get_genome(&self, id: GenomeId) -> StoreResult<Option<GenomeRecord>>;

    fn genomes_for_generation(&self, id: GenerationId) -> StoreResult<Vec<GenomeRecord>>;

    fn genome_count(&self, id: GenerationId) -> StoreResult<usize>;

    fn set_fitness(&self, id: GenomeId, fitness: f64) -> StoreResult<()>;

    // --- jobs ---

    fn insert_jobs(&self, jobs: &[Job]) -> StoreResult<()>;

    fn get_job(&self, id: JobId) -> StoreResult<Option<Job>>;

    /// Any pending job, oldest first. Not a claim.
    fn next_pending_job(&self) -> StoreResult<Option<JobId>>;

    /// Move a job from `pending` to `processing` for `worker_id`.
    ///
    /// Returns `true` iff this call performed the transition.
    fn try_claim_job(&self, id: JobId, worker_id: &str) -> StoreResult<bool>;

    /// Move a job to a terminal status.
    fn finish_job(&self, id: JobId, status: JobStatus, error: Option<&str>) -> StoreResult<()>;

    /// Status counts over the jobs of a generation's genomes.
    fn job_counts(&self, generation: GenerationId) -> StoreResult<JobStatusCounts>;

    // --- results ---

    /// Persist a batch result and its time series.
    fn record_batch(&self, batch: &BatchResult, snapshots: &[Snapshot]) -> StoreResult<()>;

    fn batch_results(&self) -> StoreResult<Vec<BatchResult>>;

    fn time_series(&self, simulation_id: Uuid) -> StoreResult<Vec<Snapshot>>;
}
