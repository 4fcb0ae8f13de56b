// ── Firewall filter rules guarding the API port ──

use edgeprov_api::DeviceConnection;
use tracing::debug;

use super::{EnsureOutcome, ReconcileTarget, ensure, ensure_tagged, find, move_to_front};
use crate::error::CoreError;

const FILTER: &str = "/ip/firewall/filter";

/// Accept `src_ip` on the API port and keep the rule at the top of the
/// filter table, ahead of any catch-all drop.
///
/// Rules are matched by `comment` plus `src-address`, so one comment can
/// cover several management addresses.
pub async fn ensure_firewall_allow(
    conn: &DeviceConnection,
    port: u16,
    src_ip: &str,
    comment: &str,
) -> Result<EnsureOutcome, CoreError> {
    let port = port.to_string();
    let target = ReconcileTarget::new(FILTER)
        .key("comment", comment)
        .key("src-address", src_ip)
        .field("chain", "input")
        .field("protocol", "tcp")
        .field("dst-port", port)
        .field("action", "accept");

    let mut outcome = ensure(conn, &target).await?;

    if let Some(id) = find(conn, &target).await?.as_ref().and_then(|r| r.id().map(str::to_owned)) {
        if move_to_front(conn, FILTER, &id).await? {
            debug!(host = %conn.host(), src_ip, "allow rule moved to top");
            if outcome == EnsureOutcome::Unchanged {
                outcome = EnsureOutcome::Updated;
            }
        }
    }
    Ok(outcome)
}

/// Drop everything else on the API port. Create-only, matched by comment.
pub async fn ensure_firewall_drop(conn: &DeviceConnection, port: u16, comment: &str) -> Result<EnsureOutcome, CoreError> {
    let port = port.to_string();
    ensure_tagged(
        conn,
        FILTER,
        comment,
        &[
            ("chain", "input"),
            ("protocol", "tcp"),
            ("dst-port", &port),
            ("action", "drop"),
        ],
    )
    .await
}
