// ── Identity, management access, scripts ──

use std::collections::BTreeSet;

use edgeprov_api::{Command, DeviceConnection};
use tracing::debug;

use super::network::{ensure_interface_list, ensure_interface_list_member};
use super::{EnsureOutcome, ReconcileTarget, ensure, ensure_settings, find, update_existing};
use crate::error::CoreError;

pub async fn ensure_identity(conn: &DeviceConnection, name: &str) -> Result<EnsureOutcome, CoreError> {
    ensure_settings(conn, "/system/identity", &[("name", name)]).await
}

/// Enable the API service on `port`. The service entry always exists.
pub async fn ensure_api_service(conn: &DeviceConnection, port: u16) -> Result<EnsureOutcome, CoreError> {
    update_existing(
        conn,
        &ReconcileTarget::new("/ip/service")
            .key("name", "api")
            .field("port", port.to_string())
            .field("disabled", "no"),
    )
    .await
}

/// User group with `policy`. RouterOS prints the policy back in its own
/// order with every withheld right negated, so only granted rights count.
pub async fn ensure_user_group(conn: &DeviceConnection, name: &str, policy: &str) -> Result<EnsureOutcome, CoreError> {
    let target = ReconcileTarget::new("/user/group")
        .key("name", name)
        .field("policy", policy);
    let existing = find(conn, &target).await?;
    if existing.is_some_and(|group| granted(group.get("policy").unwrap_or_default()) == granted(policy)) {
        return Ok(EnsureOutcome::Unchanged);
    }
    ensure(conn, &target).await
}

fn granted(policy: &str) -> BTreeSet<&str> {
    policy
        .split(',')
        .map(str::trim)
        .filter(|right| !right.is_empty() && !right.starts_with('!'))
        .collect()
}

/// Local user in `group`. Passwords are never printed back, so an existing
/// user always gets its password rewritten.
pub async fn ensure_user(
    conn: &DeviceConnection,
    name: &str,
    password: &str,
    group: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/user")
            .key("name", name)
            .field("group", group)
            .field("password", password),
    )
    .await
}

pub async fn ensure_script(conn: &DeviceConnection, name: &str, source: &str) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/system/script")
            .key("name", name)
            .field("source", source),
    )
    .await
}

/// Scheduler entry running `on_event` every `interval`, starting at boot.
pub async fn ensure_scheduler(
    conn: &DeviceConnection,
    name: &str,
    interval: &str,
    on_event: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/system/scheduler")
            .key("name", name)
            .field("interval", interval)
            .field("on-event", on_event)
            .field("start-time", "startup"),
    )
    .await
}

pub async fn run_script(conn: &DeviceConnection, name: &str) -> Result<(), CoreError> {
    conn.run(&Command::new("/system/script/run").arg("number", name))
        .await?;
    debug!(host = %conn.host(), script = name, "script run");
    Ok(())
}

/// Limit neighbor discovery and MAC access to the interfaces in `list`.
pub async fn restrict_discovery(
    conn: &DeviceConnection,
    list: &str,
    interfaces: &[String],
) -> Result<EnsureOutcome, CoreError> {
    let mut outcomes = vec![ensure_interface_list(conn, list).await?];
    for interface in interfaces {
        outcomes.push(ensure_interface_list_member(conn, list, interface).await?);
    }
    outcomes.push(
        ensure_settings(
            conn,
            "/ip/neighbor/discovery-settings",
            &[("discover-interface-list", list)],
        )
        .await?,
    );
    outcomes.push(ensure_settings(conn, "/tool/mac-server", &[("allowed-interface-list", list)]).await?);
    outcomes.push(
        ensure_settings(
            conn,
            "/tool/mac-server/mac-winbox",
            &[("allowed-interface-list", list)],
        )
        .await?,
    );

    Ok(if outcomes.iter().any(|o| o.changed()) {
        EnsureOutcome::Updated
    } else {
        EnsureOutcome::Unchanged
    })
}
