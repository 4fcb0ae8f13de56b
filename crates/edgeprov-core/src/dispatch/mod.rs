// ── Job dispatch ──
//
// Handlers are looked up by `JobType` when a job runs, never bound to the
// job itself. Each feature area contributes its handlers through a
// `register_*` function so the table is assembled once at startup.

mod dispatcher;
pub mod handlers;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use edgeprov_api::DeviceConnection;
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::connector::{DeviceConnector, StaticDeviceDirectory};
use crate::error::CoreError;
use crate::model::{JobType, ProvisioningJob};

pub use dispatcher::{BatchReport, Dispatcher};
pub use handlers::{register_captive_handlers, register_router_handlers, register_subscriber_handlers};

/// Everything a handler may touch while running one job.
pub struct JobContext<'a> {
    pub job: &'a ProvisioningJob,
    connector: &'a dyn DeviceConnector,
    devices: &'a StaticDeviceDirectory,
}

impl<'a> JobContext<'a> {
    pub fn new(
        job: &'a ProvisioningJob,
        connector: &'a dyn DeviceConnector,
        devices: &'a StaticDeviceDirectory,
    ) -> Self {
        Self {
            job,
            connector,
            devices,
        }
    }

    /// Resolve the job target and open a session to it.
    pub async fn connect(&self) -> Result<DeviceConnection, CoreError> {
        let info = self.devices.resolve(&self.job.target)?;
        debug!(job_id = %self.job.id, host = %info.host, "connecting");
        self.connector.connect(info).await
    }
}

/// Device-side work for one or more job types.
pub trait JobHandler: Send + Sync {
    fn handle<'a>(&'a self, ctx: &'a JobContext<'a>) -> BoxFuture<'a, Result<(), CoreError>>;
}

/// Job type → handler table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with every built-in feature area registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        register_subscriber_handlers(&mut registry);
        register_router_handlers(&mut registry);
        register_captive_handlers(&mut registry);
        registry
    }

    /// Register `handler` for `job_type`, returning the one it replaces.
    pub fn register(&mut self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Option<Arc<dyn JobHandler>> {
        self.handlers.insert(job_type, handler)
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.handlers.contains_key(&job_type)
    }

    /// Registered job types, in declaration order.
    pub fn job_types(&self) -> Vec<JobType> {
        use strum::IntoEnumIterator;
        JobType::iter().filter(|t| self.contains(*t)).collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_leaves_snapshot_export_unhandled() {
        let registry = HandlerRegistry::with_builtin();
        assert!(registry.contains(JobType::ActivateSubscription));
        assert!(registry.contains(JobType::DeviceHealthcheck));
        assert!(registry.contains(JobType::WalledGardenApply));
        assert!(!registry.contains(JobType::ExportConfigSnapshot));
        assert_eq!(registry.job_types().len(), 13);
    }
}
