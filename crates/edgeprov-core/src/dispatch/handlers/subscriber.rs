// ── Subscriber lifecycle handlers ──
//
// Each lifecycle job maps to a short sequence of reconcile primitives,
// chosen by the subscription's service type.

use std::sync::Arc;

use edgeprov_api::DeviceConnection;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use crate::dispatch::{HandlerRegistry, JobContext, JobHandler};
use crate::error::CoreError;
use crate::model::{JobType, MacAddress, ServiceType, SubscriptionPayload, non_empty, parse_payload};
use crate::reconcile::{
    self, disable_queue, ensure_ppp_secret, ensure_queue, ensure_static_lease, remove_ppp_session,
    remove_queue, set_ppp_secret_disabled,
};

const JOB_TYPES: [JobType; 9] = [
    JobType::ActivateSubscription,
    JobType::SuspendSubscription,
    JobType::ReconnectSubscription,
    JobType::TerminateSubscription,
    JobType::ChangePlan,
    JobType::DisconnectSession,
    JobType::ActivatePppoe,
    JobType::ActivateDhcp,
    JobType::EnsureQueue,
];

pub fn register_subscriber_handlers(registry: &mut HandlerRegistry) {
    let handler = Arc::new(SubscriberHandler);
    for job_type in JOB_TYPES {
        registry.register(job_type, handler.clone());
    }
}

/// Handles every subscriber lifecycle job type.
#[derive(Debug, Default)]
pub struct SubscriberHandler;

impl JobHandler for SubscriberHandler {
    fn handle<'a>(&'a self, ctx: &'a JobContext<'a>) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            let sub: SubscriptionPayload = parse_payload("subscription", &ctx.job.payload)?;
            let conn = ctx.connect().await?;
            let is_pppoe = sub.service_type == Some(ServiceType::Pppoe);

            match ctx.job.job_type {
                JobType::ActivateSubscription => {
                    match sub.service_type {
                        Some(ServiceType::Pppoe) => ensure_secret(&conn, &sub).await?,
                        Some(ServiceType::Dhcp) => ensure_lease(&conn, &sub).await?,
                        None => debug!(subscription = %sub.name, "no service type, queue only"),
                    }
                    ensure_subscriber_queue(&conn, &sub).await?;
                }
                JobType::SuspendSubscription => {
                    if is_pppoe {
                        set_ppp_secret_disabled(&conn, sub.require_pppoe_username()?, true).await?;
                    }
                    disable_queue(&conn, &sub.name).await?;
                }
                JobType::ReconnectSubscription => {
                    if is_pppoe {
                        set_ppp_secret_disabled(&conn, sub.require_pppoe_username()?, false).await?;
                    }
                    ensure_subscriber_queue(&conn, &sub).await?;
                }
                JobType::TerminateSubscription => {
                    if is_pppoe {
                        set_ppp_secret_disabled(&conn, sub.require_pppoe_username()?, true).await?;
                    }
                    remove_queue(&conn, &sub.name).await?;
                }
                JobType::ChangePlan => {
                    if is_pppoe {
                        ensure_secret(&conn, &sub).await?;
                    }
                    ensure_subscriber_queue(&conn, &sub).await?;
                }
                JobType::DisconnectSession => {
                    let user = non_empty(sub.pppoe_username.as_deref()).unwrap_or(&sub.name);
                    if is_pppoe {
                        remove_ppp_session(&conn, user).await?;
                    } else {
                        reconcile::remove_hotspot_session(&conn, user).await?;
                    }
                }
                JobType::ActivatePppoe => ensure_secret(&conn, &sub).await?,
                JobType::ActivateDhcp => ensure_lease(&conn, &sub).await?,
                JobType::EnsureQueue => ensure_subscriber_queue(&conn, &sub).await?,
                other => {
                    return Err(CoreError::NoHandler {
                        job_type: other.to_string(),
                    });
                }
            }

            info!(
                job_id = %ctx.job.id,
                job_type = %ctx.job.job_type,
                subscription = %sub.name,
                host = %conn.host(),
                "subscriber job applied"
            );
            Ok(())
        }
        .boxed()
    }
}

async fn ensure_secret(conn: &DeviceConnection, sub: &SubscriptionPayload) -> Result<(), CoreError> {
    let username = sub.require_pppoe_username()?;
    let password = non_empty(sub.pppoe_password.as_deref()).ok_or_else(|| {
        CoreError::validation(format!("subscription {} has no pppoe_password", sub.name))
    })?;
    ensure_ppp_secret(conn, username, password, &sub.ppp_profile).await?;
    Ok(())
}

async fn ensure_lease(conn: &DeviceConnection, sub: &SubscriptionPayload) -> Result<(), CoreError> {
    let (Some(ip), Some(mac)) = (sub.service_ip(), sub.service_mac()) else {
        warn!(subscription = %sub.name, "dhcp lease needs service_ip and service_mac, skipped");
        return Ok(());
    };
    ensure_static_lease(conn, MacAddress::new(mac).as_str(), ip, &sub.name).await?;
    Ok(())
}

async fn ensure_subscriber_queue(conn: &DeviceConnection, sub: &SubscriptionPayload) -> Result<(), CoreError> {
    let Some(ip) = sub.service_ip() else {
        debug!(subscription = %sub.name, "no service_ip, queue skipped");
        return Ok(());
    };
    ensure_queue(conn, &sub.name, ip, &sub.max_limit(), &sub.name).await?;
    Ok(())
}
