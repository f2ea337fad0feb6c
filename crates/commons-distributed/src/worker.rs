//! Worker: leases jobs and turns them into fitness scores.
//!
//! A worker is single-threaded: lease a job, run the simulation it
//! describes, persist the results, and report. Any error while processing
//! a job marks that job failed; the worker itself keeps going.

use crate::queue::JobQueue;
use crate::store::EvolutionStore;
use crate::types::*;
use commons_agents::policy::Policy;
use commons_core::config::WorldConfig;
use commons_runtime::evaluation::{EvaluationResult, EvaluationRun};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Default sleep after finding no work.
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_secs(5);

/// Result of one [`Worker::run_once`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerStep {
    /// No job was leased.
    Idle,
    Completed { job: JobId, fitness: f64 },
    Failed { job: JobId, error: String },
}

pub struct Worker {
    id: String,
    store: Arc<dyn EvolutionStore>,
    queue: JobQueue,
    world: WorldConfig,
    idle_backoff: Duration,
}

impl Worker {
    pub fn new(id: impl Into<String>, store: Arc<dyn EvolutionStore>, world: WorldConfig) -> Self {
        Self {
            id: id.into(),
            queue: JobQueue::new(Arc::clone(&store)),
            store,
            world,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
        }
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lease and process at most one job.
    pub fn run_once(&self) -> WorkerStep {
        let Some(job) = self.queue.lease(&self.id) else {
            return WorkerStep::Idle;
        };

        match self.process(&job) {
            Ok(result) => {
                let fitness = result.fitness();
                match self.queue.complete(job.id) {
                    Ok(()) => WorkerStep::Completed { job: job.id, fitness },
                    Err(e) => self.fail(&job, &WorkerError::from(e)),
                }
            }
            Err(e) => self.fail(&job, &e),
        }
    }

    /// Process jobs forever, sleeping after every idle poll.
    pub fn run(&self) {
        info!(worker = %self.id, "worker started");
        loop {
            if let WorkerStep::Idle = self.run_once() {
                debug!(worker = %self.id, backoff = ?self.idle_backoff, "no pending jobs");
                std::thread::sleep(self.idle_backoff);
            }
        }
    }

    /// Process until the queue is empty. Returns the steps taken.
    pub fn drain(&self) -> Vec<WorkerStep> {
        std::iter::from_fn(|| match self.run_once() {
            WorkerStep::Idle => None,
            step => Some(step),
        })
        .collect()
    }

    fn process(&self, job: &Job) -> Result<EvaluationResult, WorkerError> {
        let params = &job.params;
        let mut run = EvaluationRun::new(self.world.clone(), params.resource_density, params.agent_strategy)
            .with_mixed_ratio(params.mixed_ratio)
            .with_max_ticks(params.max_ticks)
            .with_seed(params.seed);

        if let Some(genome_id) = job.genome_id {
            let genome = self
                .store
                .get_genome(genome_id)?
                .ok_or(WorkerError::MissingGenome(genome_id))?;
            let policy = Policy::from_weights(&genome.weights)?;
            let expected = self.world.observation_size();
            if policy.input_size() != expected {
                return Err(WorkerError::IncompatibleGenome {
                    expected,
                    found: policy.input_size(),
                });
            }
            run = run.with_policy(Arc::new(policy));
        }

        info!(
            worker = %self.id,
            job = %job.id,
            strategy = %params.agent_strategy,
            density = params.resource_density,
            "running simulation"
        );
        let result = run.execute()?;

        self.store
            .record_batch(&result.batch_result(&self.id), &result.snapshots)?;
        if let Some(genome_id) = job.genome_id {
            self.store.set_fitness(genome_id, result.fitness())?;
            info!(genome = %genome_id, fitness = result.fitness(), "fitness recorded");
        }
        Ok(result)
    }

    fn fail(&self, job: &Job, e: &WorkerError) -> WorkerStep {
        let message = e.to_string();
        error!(worker = %self.id, job = %job.id, error = %message, "job processing failed");
        if let Err(store_err) = self.queue.fail(job.id, &message) {
            error!(job = %job.id, error = %store_err, "could not mark job failed");
        }
        WorkerStep::Failed {
            job: job.id,
            error: message,
        }
    }
}
