// ── Captive portal handlers ──

use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::info;

use crate::dispatch::{HandlerRegistry, JobContext, JobHandler};
use crate::error::CoreError;
use crate::model::{CaptivePayload, JobType, WalledGardenPayload, non_empty, parse_payload};
use crate::reconcile::{disable_hotspot_user, ensure_hotspot_user, ensure_walled_garden};

pub fn register_captive_handlers(registry: &mut HandlerRegistry) {
    let handler = Arc::new(CaptiveHandler);
    for job_type in [
        JobType::CaptiveUserCreate,
        JobType::CaptiveUserDisable,
        JobType::WalledGardenApply,
    ] {
        registry.register(job_type, handler.clone());
    }
}

/// Hotspot users and walled-garden entries.
#[derive(Debug, Default)]
pub struct CaptiveHandler;

impl JobHandler for CaptiveHandler {
    fn handle<'a>(&'a self, ctx: &'a JobContext<'a>) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            let payload = &ctx.job.payload;
            match ctx.job.job_type {
                JobType::CaptiveUserCreate => {
                    let user: CaptivePayload = parse_payload("captive user", payload)?;
                    let conn = ctx.connect().await?;
                    let outcome = ensure_hotspot_user(
                        &conn,
                        &user.username,
                        user.password.as_deref().unwrap_or(""),
                        &user.profile,
                        user.comment.as_deref().unwrap_or(""),
                    )
                    .await?;
                    info!(job_id = %ctx.job.id, username = %user.username, ?outcome, "captive user active");
                }
                JobType::CaptiveUserDisable => {
                    let user: CaptivePayload = parse_payload("captive user", payload)?;
                    let conn = ctx.connect().await?;
                    let outcome = disable_hotspot_user(&conn, &user.username).await?;
                    info!(job_id = %ctx.job.id, username = %user.username, ?outcome, "captive user disabled");
                }
                JobType::WalledGardenApply => {
                    let entry: WalledGardenPayload = parse_payload("walled garden", payload)?;
                    let comment = non_empty(entry.comment.as_deref())
                        .map_or_else(|| format!("WG {}", entry.domain), str::to_owned);
                    let conn = ctx.connect().await?;
                    let outcome = ensure_walled_garden(&conn, &entry.domain, &comment).await?;
                    info!(job_id = %ctx.job.id, domain = %entry.domain, ?outcome, "walled garden applied");
                }
                other => {
                    return Err(CoreError::NoHandler {
                        job_type: other.to_string(),
                    });
                }
            }
            Ok(())
        }
        .boxed()
    }
}
