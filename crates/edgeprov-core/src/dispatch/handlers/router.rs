// ── Router maintenance handlers ──

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::info;

use crate::dispatch::{HandlerRegistry, JobContext, JobHandler};
use crate::error::CoreError;
use crate::model::JobType;

pub fn register_router_handlers(registry: &mut HandlerRegistry) {
    registry.register(JobType::DeviceHealthcheck, Arc::new(HealthcheckHandler));
}

/// Reads `/system/resource` and `/system/identity` and reports them.
#[derive(Debug, Default)]
pub struct HealthcheckHandler;

impl JobHandler for HealthcheckHandler {
    fn handle<'a>(&'a self, ctx: &'a JobContext<'a>) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            let conn = ctx.connect().await?;
            let resource = conn.print("/system/resource", &[]).await?;
            let identity = conn.print("/system/identity", &[]).await?;

            let version = resource.first().and_then(|r| r.get("version")).unwrap_or("unknown");
            let name = identity.first().and_then(|r| r.get("name")).unwrap_or("unknown");
            let uptime = resource.first().and_then(|r| r.get("uptime")).unwrap_or("-");
            info!(
                job_id = %ctx.job.id,
                host = %conn.host(),
                identity = name,
                version,
                uptime,
                "healthcheck ok"
            );
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::connector::{DeviceEntry, SimulatedFleet, StaticDeviceDirectory};
    use crate::model::{JobTarget, ProvisioningJob};
    use edgeprov_api::{ConnectionInfo, SimulatedDevice};
    use secrecy::SecretString;

    #[tokio::test]
    async fn healthcheck_reads_resource_and_identity() {
        let fleet = SimulatedFleet::new();
        let device = fleet.add(SimulatedDevice::new("10.0.0.2"));
        let devices = StaticDeviceDirectory::new().with_device(
            "r1",
            DeviceEntry {
                info: ConnectionInfo::new("10.0.0.2", 8728, "admin", SecretString::from("")),
                sector: None,
            },
        );
        let job = ProvisioningJob::new(JobType::DeviceHealthcheck, JobTarget::device("r1"), Map::new());
        HealthcheckHandler
            .handle(&JobContext::new(&job, &fleet, &devices))
            .await
            .unwrap();

        let paths: Vec<String> = device.commands().iter().map(|c| c.path().to_owned()).collect();
        assert_eq!(paths, vec!["/system/resource/print", "/system/identity/print"]);
        assert!(device.mutations().is_empty());
    }

    #[tokio::test]
    async fn unreachable_device_fails_the_job() {
        let fleet = SimulatedFleet::new();
        let devices = StaticDeviceDirectory::new().with_device(
            "r1",
            DeviceEntry {
                info: ConnectionInfo::new("10.0.0.9", 8728, "admin", SecretString::from("")),
                sector: None,
            },
        );
        let job = ProvisioningJob::new(JobType::DeviceHealthcheck, JobTarget::device("r1"), Map::new());
        let err = HealthcheckHandler
            .handle(&JobContext::new(&job, &fleet, &devices))
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }
}
