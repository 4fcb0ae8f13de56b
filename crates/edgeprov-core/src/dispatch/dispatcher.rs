// ── Dispatcher: job state machine and batch runner ──

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{HandlerRegistry, JobContext};
use crate::connector::{DeviceConnector, StaticDeviceDirectory};
use crate::error::CoreError;
use crate::model::{DEFAULT_MAX_ATTEMPTS, JobId, JobState, JobTarget, JobType, ProvisioningJob};
use crate::store::JobStore;

const MAX_ATTEMPTS_REACHED: &str = "max attempts reached";

/// Outcome of one `run_pending` batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub picked: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// `(job, error)` for every job that ended the batch in error.
    pub errors: Vec<(JobId, String)>,
}

/// Owns the job lifecycle: queued → running → success | failed.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    connector: Arc<dyn DeviceConnector>,
    devices: StaticDeviceDirectory,
    default_max_attempts: u32,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: HandlerRegistry,
        connector: Arc<dyn DeviceConnector>,
        devices: StaticDeviceDirectory,
    ) -> Self {
        Self {
            store,
            registry,
            connector,
            devices,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Retry ceiling stamped on newly enqueued jobs.
    pub fn with_default_max_attempts(mut self, max_attempts: u32) -> Self {
        self.default_max_attempts = max_attempts.max(1);
        self
    }

    pub fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn devices(&self) -> &StaticDeviceDirectory {
        &self.devices
    }

    /// Queue a job. Job types without a handler are refused up front.
    pub fn enqueue(
        &self,
        job_type: JobType,
        target: JobTarget,
        payload: Map<String, Value>,
    ) -> Result<JobId, CoreError> {
        if !self.registry.contains(job_type) {
            return Err(CoreError::NoHandler {
                job_type: job_type.to_string(),
            });
        }
        let job = ProvisioningJob::new(job_type, target, payload)
            .with_max_attempts(self.default_max_attempts);
        let id = job.id;
        self.store.insert(job)?;
        info!(job_id = %id, %job_type, "job queued");
        Ok(id)
    }

    /// Run up to `limit` queued jobs, oldest request first, one at a time.
    /// A failing job is recorded and the batch moves on.
    pub async fn run_pending(&self, limit: usize) -> Result<BatchReport, CoreError> {
        let jobs = self.store.queued(limit)?;
        let mut report = BatchReport {
            picked: jobs.len(),
            ..BatchReport::default()
        };

        for mut job in jobs {
            match self.execute(&mut job).await {
                Ok(()) if job.state == JobState::Success => report.succeeded += 1,
                Ok(()) => {
                    report.failed += 1;
                    if let Some(message) = &job.error_message {
                        report.errors.push((job.id, message.clone()));
                    }
                }
                Err(err) => {
                    warn!(job_id = %job.id, job_type = %job.job_type, error = %err, "job failed");
                    report.failed += 1;
                    report.errors.push((job.id, err.to_string()));
                }
            }
        }

        info!(
            picked = report.picked,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch finished"
        );
        Ok(report)
    }

    /// Run one job through the state machine, persisting each transition.
    ///
    /// Only queued jobs run. A job already at its retry ceiling is marked
    /// failed without invoking a handler. A missing handler leaves the job
    /// untouched. Handler errors are recorded on the job and returned.
    pub async fn execute(&self, job: &mut ProvisioningJob) -> Result<(), CoreError> {
        if job.state != JobState::Queued {
            return Ok(());
        }

        if job.is_exhausted() {
            job.state = JobState::Failed;
            job.error_message = Some(MAX_ATTEMPTS_REACHED.into());
            self.store.update(job)?;
            warn!(job_id = %job.id, attempts = job.attempts, "job exhausted before running");
            return Ok(());
        }

        let handler = self.registry.get(job.job_type).ok_or_else(|| CoreError::NoHandler {
            job_type: job.job_type.to_string(),
        })?;

        job.state = JobState::Running;
        job.attempts += 1;
        job.error_message = None;
        job.executed_at = Some(Utc::now());
        self.store.update(job)?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            target = %job.target,
            "job running"
        );

        let snapshot = job.clone();
        let ctx = JobContext::new(&snapshot, self.connector.as_ref(), &self.devices);
        match handler.handle(&ctx).await {
            Ok(()) => {
                job.state = JobState::Success;
                self.store.update(job)?;
                info!(job_id = %job.id, "job succeeded");
                Ok(())
            }
            Err(err) => {
                job.state = JobState::Failed;
                job.error_message = Some(err.to_string());
                self.store.update(job)?;
                Err(err)
            }
        }
    }

    /// Load and execute one job by id, returning its final form.
    pub async fn execute_id(&self, id: JobId) -> Result<ProvisioningJob, CoreError> {
        let mut job = self.load(id)?;
        self.execute(&mut job).await?;
        Ok(job)
    }

    /// Operator re-run: a failed job with attempts left goes back to
    /// `queued`. Attempts are kept, so the ceiling still holds.
    pub fn requeue(&self, id: JobId) -> Result<ProvisioningJob, CoreError> {
        let mut job = self.load(id)?;
        if job.state != JobState::Failed {
            return Err(CoreError::RequeueRefused {
                id: id.to_string(),
                reason: format!("job is {}, only failed jobs can be re-queued", job.state),
            });
        }
        if job.is_exhausted() {
            return Err(CoreError::RequeueRefused {
                id: id.to_string(),
                reason: format!("{MAX_ATTEMPTS_REACHED} ({}/{})", job.attempts, job.max_attempts),
            });
        }
        job.state = JobState::Queued;
        self.store.update(&job)?;
        info!(job_id = %id, attempts = job.attempts, "job re-queued");
        Ok(job)
    }

    fn load(&self, id: JobId) -> Result<ProvisioningJob, CoreError> {
        self.store
            .get(id)?
            .ok_or_else(|| CoreError::JobNotFound { id: id.to_string() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use edgeprov_api::{ConnectionInfo, SimulatedDevice};
    use futures_util::FutureExt;
    use futures_util::future::BoxFuture;
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::connector::{DeviceEntry, SimulatedFleet};
    use crate::dispatch::JobHandler;
    use crate::store::MemoryJobStore;

    /// Fails its first `failures` invocations.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl JobHandler for Flaky {
        fn handle<'a>(&'a self, _ctx: &'a JobContext<'a>) -> BoxFuture<'a, Result<(), CoreError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let result = if call < self.failures {
                Err(CoreError::Internal(format!("flaky call {call}")))
            } else {
                Ok(())
            };
            futures_util::future::ready(result).boxed()
        }
    }

    fn flaky(failures: u32) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
        })
    }

    fn bare_dispatcher(registry: HandlerRegistry) -> Dispatcher {
        Dispatcher::new(
            Arc::new(MemoryJobStore::new()),
            registry,
            Arc::new(SimulatedFleet::new()),
            StaticDeviceDirectory::new(),
        )
    }

    fn sim_dispatcher() -> (Dispatcher, Arc<SimulatedDevice>) {
        let fleet = SimulatedFleet::new();
        let device = fleet.add(SimulatedDevice::new("10.0.0.2"));
        let devices = StaticDeviceDirectory::new().with_device(
            "r1",
            DeviceEntry {
                info: ConnectionInfo::new("10.0.0.2", 8728, "admin", SecretString::from("")),
                sector: Some("NORTE".into()),
            },
        );
        let dispatcher = Dispatcher::new(
            Arc::new(MemoryJobStore::new()),
            HandlerRegistry::with_builtin(),
            Arc::new(fleet),
            devices,
        );
        (dispatcher, device)
    }

    fn pppoe_payload() -> Map<String, Value> {
        json!({
            "name": "SUB-0001",
            "service_type": "pppoe",
            "pppoe_username": "jdoe",
            "pppoe_password": "s3cret",
            "service_ip": "10.10.0.20",
            "download_mbps": 50,
            "upload_mbps": 10
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn enqueue_rejects_unhandled_types() {
        let dispatcher = bare_dispatcher(HandlerRegistry::with_builtin());
        let err = dispatcher
            .enqueue(JobType::ExportConfigSnapshot, JobTarget::device("r1"), Map::new())
            .unwrap_err();
        assert!(err.is_config());
        assert!(dispatcher.store().list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn attempts_never_exceed_ceiling() {
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::EnsureQueue, flaky(u32::MAX));
        let dispatcher = bare_dispatcher(registry);
        let id = dispatcher
            .enqueue(JobType::EnsureQueue, JobTarget::device("r1"), Map::new())
            .unwrap();

        for _ in 0..10 {
            dispatcher.run_pending(5).await.unwrap();
            let _ = dispatcher.requeue(id);
        }
        let job = dispatcher.store().get(id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, job.max_attempts);
        assert!(dispatcher.requeue(id).is_err());
    }

    #[tokio::test]
    async fn exhausted_failed_job_is_left_alone() {
        let handler = flaky(0);
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::EnsureQueue, handler.clone());
        let dispatcher = bare_dispatcher(registry);

        let mut job = ProvisioningJob::new(JobType::EnsureQueue, JobTarget::device("r1"), Map::new());
        job.state = JobState::Failed;
        job.attempts = 3;
        job.error_message = Some("boom".into());
        dispatcher.store().insert(job.clone()).unwrap();

        let before = job.clone();
        dispatcher.execute(&mut job).await.unwrap();
        assert_eq!(job, before);
        assert_eq!(dispatcher.store().get(job.id).unwrap().unwrap(), before);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queued_job_at_ceiling_fails_without_handler_call() {
        let handler = flaky(0);
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::EnsureQueue, handler.clone());
        let dispatcher = bare_dispatcher(registry);

        let mut job = ProvisioningJob::new(JobType::EnsureQueue, JobTarget::device("r1"), Map::new());
        job.attempts = 3;
        dispatcher.store().insert(job.clone()).unwrap();

        dispatcher.execute(&mut job).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error_message.as_deref(), Some("max attempts reached"));
        assert_eq!(job.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_handler_consumes_no_attempt() {
        let dispatcher = bare_dispatcher(HandlerRegistry::new());
        let mut job = ProvisioningJob::new(JobType::ExportConfigSnapshot, JobTarget::device("r1"), Map::new());
        dispatcher.store().insert(job.clone()).unwrap();

        let err = dispatcher.execute(&mut job).await.unwrap_err();
        assert!(matches!(err, CoreError::NoHandler { .. }));
        let stored = dispatcher.store().get(job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Queued);
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn failing_job_does_not_block_the_batch() {
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::EnsureQueue, flaky(u32::MAX));
        registry.register(JobType::DeviceHealthcheck, flaky(0));
        let dispatcher = bare_dispatcher(registry);

        let bad = dispatcher
            .enqueue(JobType::EnsureQueue, JobTarget::device("r1"), Map::new())
            .unwrap();
        let good = dispatcher
            .enqueue(JobType::DeviceHealthcheck, JobTarget::device("r1"), Map::new())
            .unwrap();

        let report = dispatcher.run_pending(10).await.unwrap();
        assert_eq!(report.picked, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].0, bad);
        assert_eq!(dispatcher.store().get(good).unwrap().unwrap().state, JobState::Success);
    }

    #[tokio::test]
    async fn batch_respects_limit_and_request_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(JobType::DeviceHealthcheck, flaky(0));
        let dispatcher = bare_dispatcher(registry);
        let ids: Vec<JobId> = (0..3)
            .map(|_| {
                dispatcher
                    .enqueue(JobType::DeviceHealthcheck, JobTarget::device("r1"), Map::new())
                    .unwrap()
            })
            .collect();

        let report = dispatcher.run_pending(2).await.unwrap();
        assert_eq!(report.picked, 2);
        let remaining = dispatcher.store().queued(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[2]);
    }

    #[tokio::test]
    async fn activation_succeeds_on_third_manual_rerun() {
        let (dispatcher, device) = sim_dispatcher();
        device.fail_next("/ppp/secret/print", 2, "simulated outage");

        let id = dispatcher
            .enqueue(JobType::ActivateSubscription, JobTarget::device("r1"), pppoe_payload())
            .unwrap();

        let first = dispatcher.run_pending(10).await.unwrap();
        assert_eq!(first.failed, 1);
        dispatcher.requeue(id).unwrap();
        let second = dispatcher.run_pending(10).await.unwrap();
        assert_eq!(second.failed, 1);
        dispatcher.requeue(id).unwrap();
        let third = dispatcher.run_pending(10).await.unwrap();
        assert_eq!(third.succeeded, 1);

        let job = dispatcher.store().get(id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Success);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.error_message, None);
        assert_eq!(device.records("/ppp/secret").len(), 1);
        assert_eq!(device.records("/queue/simple")[0].get("max-limit"), Some("50M/10M"));
    }

    #[tokio::test]
    async fn requeue_refuses_non_failed_jobs() {
        let (dispatcher, _device) = sim_dispatcher();
        let id = dispatcher
            .enqueue(JobType::DeviceHealthcheck, JobTarget::device("r1"), Map::new())
            .unwrap();
        assert!(matches!(
            dispatcher.requeue(id).unwrap_err(),
            CoreError::RequeueRefused { .. }
        ));
        let job = dispatcher.execute_id(id).await.unwrap();
        assert_eq!(job.state, JobState::Success);
        assert!(dispatcher.requeue(id).is_err());
        assert!(dispatcher.requeue(JobId::new()).unwrap_err().is_not_found());
    }
}
