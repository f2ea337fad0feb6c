//! Job queue over the shared store.
//!
//! Leasing is two steps: find any pending job, then claim it with a
//! conditional write. Between the two another worker may claim the same job;
//! the loser sees zero rows changed and simply re-polls.

use crate::store::EvolutionStore;
use crate::types::*;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct JobQueue {
    store: Arc<dyn EvolutionStore>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn EvolutionStore>) -> Self {
        Self { store }
    }

    /// Claim a pending job for `worker_id`.
    ///
    /// Returns `None` when the queue is empty, the claim was lost to another
    /// worker, or the store failed (logged).
    pub fn lease(&self, worker_id: &str) -> Option<Job> {
        match self.try_lease(worker_id) {
            Ok(job) => job,
            Err(e) => {
                error!(worker = worker_id, error = %e, "lease failed");
                None
            }
        }
    }

    /// Like [`lease`](Self::lease), surfacing store errors.
    pub fn try_lease(&self, worker_id: &str) -> StoreResult<Option<Job>> {
        let Some(id) = self.store.next_pending_job()? else {
            return Ok(None);
        };

        if !self.store.try_claim_job(id, worker_id)? {
            warn!(job = %id, worker = worker_id, "job claimed by another worker");
            return Ok(None);
        }

        let job = self.store.get_job(id)?;
        info!(job = %id, worker = worker_id, "job claimed");
        Ok(job)
    }

    pub fn complete(&self, id: JobId) -> StoreResult<()> {
        self.store.finish_job(id, JobStatus::Completed, None)?;
        info!(job = %id, "job completed");
        Ok(())
    }

    /// Mark a job failed with its error text. Failed jobs are not retried.
    pub fn fail(&self, id: JobId, message: &str) -> StoreResult<()> {
        self.store.finish_job(id, JobStatus::Failed, Some(message))?;
        warn!(job = %id, error = message, "job failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[test]
    fn lease_drains_queue_in_order() {
        let store: Arc<dyn EvolutionStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let queue = JobQueue::new(Arc::clone(&store));
        let first = Job::new(None, JobParams::genetic(0.2, 10));
        let mut second = Job::new(None, JobParams::genetic(0.2, 10));
        second.created_at = first.created_at + 1;
        store.insert_jobs(&[second.clone(), first.clone()]).unwrap();

        assert_eq!(queue.lease("w").map(|j| j.id), Some(first.id));
        assert_eq!(queue.lease("w").map(|j| j.id), Some(second.id));
        assert!(queue.lease("w").is_none());
    }

    #[test]
    fn leased_job_is_processing_and_completes() {
        let store: Arc<dyn EvolutionStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let queue = JobQueue::new(Arc::clone(&store));
        store.insert_jobs(&[Job::new(None, JobParams::genetic(0.2, 10))]).unwrap();

        let job = queue.lease("w1").unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.assigned_to.as_deref(), Some("w1"));

        queue.complete(job.id).unwrap();
        let done = store.get_job(job.id).unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.error.is_none());
    }
}
