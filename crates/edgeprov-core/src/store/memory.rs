use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::JobStore;
use crate::error::CoreError;
use crate::model::{JobId, ProvisioningJob};

/// Concurrent in-memory job store.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    /// Job id -> (insertion sequence, job).
    jobs: DashMap<JobId, (u64, ProvisioningJob)>,
    seq: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: ProvisioningJob) -> Result<(), CoreError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.jobs.insert(job.id, (seq, job));
        Ok(())
    }

    fn get(&self, id: JobId) -> Result<Option<ProvisioningJob>, CoreError> {
        Ok(self.jobs.get(&id).map(|entry| entry.value().1.clone()))
    }

    fn update(&self, job: &ProvisioningJob) -> Result<(), CoreError> {
        let Some(mut entry) = self.jobs.get_mut(&job.id) else {
            return Err(CoreError::JobNotFound {
                id: job.id.to_string(),
            });
        };
        entry.value_mut().1 = job.clone();
        Ok(())
    }

    fn list(&self) -> Result<Vec<ProvisioningJob>, CoreError> {
        let mut rows: Vec<(u64, ProvisioningJob)> =
            self.jobs.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|(sa, a), (sb, b)| a.requested_at.cmp(&b.requested_at).then(sa.cmp(sb)));
        Ok(rows.into_iter().map(|(_, job)| job).collect())
    }
}
