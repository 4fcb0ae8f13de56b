use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::JobStore;
use crate::error::CoreError;
use crate::model::{JobId, ProvisioningJob};

/// JSON file-backed job store.
///
/// The whole queue is read on every call and rewritten (via a temp file
/// and rename) on every mutation. A missing file is an empty queue.
#[derive(Debug)]
pub struct FileJobStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileJobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<ProvisioningJob>, CoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(store_err(&self.path, &e)),
        };
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&text).map_err(|e| store_err(&self.path, &e))
    }

    fn save(&self, jobs: &[ProvisioningJob]) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| store_err(parent, &e))?;
        }
        let body = serde_json::to_string_pretty(jobs).map_err(|e| store_err(&self.path, &e))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| store_err(&tmp, &e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| store_err(&self.path, &e))?;
        debug!(path = %self.path.display(), jobs = jobs.len(), "job store saved");
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn store_err(path: &Path, err: &dyn std::fmt::Display) -> CoreError {
    CoreError::Store {
        message: format!("{}: {err}", path.display()),
    }
}

impl JobStore for FileJobStore {
    fn insert(&self, job: ProvisioningJob) -> Result<(), CoreError> {
        let _guard = self.guard();
        let mut jobs = self.load()?;
        jobs.push(job);
        self.save(&jobs)
    }

    fn get(&self, id: JobId) -> Result<Option<ProvisioningJob>, CoreError> {
        let _guard = self.guard();
        Ok(self.load()?.into_iter().find(|j| j.id == id))
    }

    fn update(&self, job: &ProvisioningJob) -> Result<(), CoreError> {
        let _guard = self.guard();
        let mut jobs = self.load()?;
        let Some(slot) = jobs.iter_mut().find(|j| j.id == job.id) else {
            return Err(CoreError::JobNotFound {
                id: job.id.to_string(),
            });
        };
        *slot = job.clone();
        self.save(&jobs)
    }

    fn list(&self) -> Result<Vec<ProvisioningJob>, CoreError> {
        let _guard = self.guard();
        let mut jobs = self.load()?;
        // Stable sort keeps file order for equal timestamps.
        jobs.sort_by_key(|j| j.requested_at);
        Ok(jobs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn queued_jobs_come_back_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        contract::queued_jobs_come_back_oldest_first(&FileJobStore::new(dir.path().join("jobs.json")));
    }

    #[test]
    fn update_replaces_and_rejects_unknown() {
        let dir = tempfile::tempdir().unwrap();
        contract::update_replaces_and_rejects_unknown(&FileJobStore::new(dir.path().join("jobs.json")));
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.json");
        let job = ProvisioningJob::new(
            crate::model::JobType::DeviceHealthcheck,
            crate::model::JobTarget::device("r1"),
            serde_json::Map::new(),
        );
        FileJobStore::new(&path).insert(job.clone()).unwrap();

        let reopened = FileJobStore::new(&path);
        assert_eq!(reopened.get(job.id).unwrap().unwrap(), job);
    }

    #[test]
    fn panicked_writer_does_not_wedge_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path().join("jobs.json"));
        std::thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _guard = store.guard();
                panic!("writer died holding the lock");
            });
            assert!(poisoner.join().is_err());
        });
        assert!(store.lock.is_poisoned());

        let job = ProvisioningJob::new(
            crate::model::JobType::DeviceHealthcheck,
            crate::model::JobTarget::device("r1"),
            serde_json::Map::new(),
        );
        store.insert(job.clone()).unwrap();
        assert_eq!(store.get(job.id).unwrap().unwrap(), job);
    }

    #[test]
    fn corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileJobStore::new(&path).list().unwrap_err();
        assert!(matches!(err, CoreError::Store { .. }));
    }
}
