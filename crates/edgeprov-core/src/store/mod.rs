// ── Job persistence ──
//
// The dispatcher only needs insert / get / update / ordered listing, so
// the store is a small synchronous trait. The in-memory store backs tests
// and embedding; the file store lets separate CLI invocations share one
// queue.

mod file;
mod memory;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

use crate::error::CoreError;
use crate::model::{JobId, JobState, ProvisioningJob};

/// Persistence for provisioning jobs. Jobs are never deleted.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: ProvisioningJob) -> Result<(), CoreError>;

    fn get(&self, id: JobId) -> Result<Option<ProvisioningJob>, CoreError>;

    /// Replace a stored job; fails if the id is unknown.
    fn update(&self, job: &ProvisioningJob) -> Result<(), CoreError>;

    /// Every job, oldest request first (insertion order breaks ties).
    fn list(&self) -> Result<Vec<ProvisioningJob>, CoreError>;

    /// Up to `limit` queued jobs, oldest request first.
    fn queued(&self, limit: usize) -> Result<Vec<ProvisioningJob>, CoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|job| job.state == JobState::Queued)
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod contract {
    //! Behaviour every `JobStore` must share.

    use chrono::{Duration, Utc};
    use serde_json::Map;

    use super::JobStore;
    use crate::model::{JobState, JobTarget, JobType, ProvisioningJob};

    pub(crate) fn queued_jobs_come_back_oldest_first(store: &dyn JobStore) {
        let now = Utc::now();
        let mut newer = ProvisioningJob::new(JobType::EnsureQueue, JobTarget::device("r1"), Map::new());
        newer.requested_at = now;
        let mut older = ProvisioningJob::new(JobType::ActivatePppoe, JobTarget::device("r1"), Map::new());
        older.requested_at = now - Duration::minutes(5);
        let mut done = ProvisioningJob::new(JobType::DeviceHealthcheck, JobTarget::device("r1"), Map::new());
        done.requested_at = now - Duration::minutes(10);
        done.state = JobState::Success;

        store.insert(newer.clone()).unwrap();
        store.insert(older.clone()).unwrap();
        store.insert(done).unwrap();

        let queued = store.queued(10).unwrap();
        let ids: Vec<_> = queued.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
        assert_eq!(store.queued(1).unwrap().len(), 1);
        assert_eq!(store.list().unwrap().len(), 3);
    }

    pub(crate) fn update_replaces_and_rejects_unknown(store: &dyn JobStore) {
        let mut job = ProvisioningJob::new(JobType::EnsureQueue, JobTarget::default(), Map::new());
        store.insert(job.clone()).unwrap();

        job.state = JobState::Failed;
        job.attempts = 1;
        job.error_message = Some("boom".into());
        store.update(&job).unwrap();
        assert_eq!(store.get(job.id).unwrap().unwrap(), job);

        let stranger = ProvisioningJob::new(JobType::EnsureQueue, JobTarget::default(), Map::new());
        assert!(store.update(&stranger).unwrap_err().is_not_found());
        assert!(store.get(stranger.id).unwrap().is_none());
    }
}
