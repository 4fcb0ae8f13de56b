// ── Hotspot (captive portal) ──

use edgeprov_api::DeviceConnection;
use tracing::{info, warn};

use super::{EnsureOutcome, ReconcileTarget, ensure, ensure_tagged};
use crate::error::CoreError;

#[derive(Debug, Clone, Copy)]
pub struct HotspotProfile<'a> {
    pub name: &'a str,
    pub dns_name: &'a str,
    pub login_by: &'a str,
    pub html_dir: &'a str,
}

impl<'a> HotspotProfile<'a> {
    /// Profile with CHAP login and the stock page directory.
    pub fn new(name: &'a str, dns_name: &'a str) -> Self {
        Self {
            name,
            dns_name,
            login_by: "http-chap",
            html_dir: "hotspot",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HotspotServer<'a> {
    pub name: &'a str,
    pub interface: &'a str,
    pub pool: &'a str,
    pub profile: &'a str,
}

pub async fn ensure_hotspot_profile(
    conn: &DeviceConnection,
    profile: HotspotProfile<'_>,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/hotspot/profile")
            .key("name", profile.name)
            .field("dns-name", profile.dns_name)
            .field("login-by", profile.login_by)
            .field("html-directory", profile.html_dir),
    )
    .await
}

pub async fn ensure_hotspot_server(
    conn: &DeviceConnection,
    server: HotspotServer<'_>,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/hotspot")
            .key("name", server.name)
            .field("interface", server.interface)
            .field("address-pool", server.pool)
            .field("profile", server.profile),
    )
    .await
}

/// Reachable-before-login host. Create-only, matched by comment.
pub async fn ensure_walled_garden(
    conn: &DeviceConnection,
    domain: &str,
    comment: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure_tagged(conn, "/ip/hotspot/walled-garden", comment, &[("dst-host", domain)]).await
}

/// Enabled hotspot user with the given credentials.
pub async fn ensure_hotspot_user(
    conn: &DeviceConnection,
    username: &str,
    password: &str,
    profile: &str,
    comment: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/hotspot/user")
            .key("name", username)
            .field("password", password)
            .field("profile", profile)
            .field("comment", comment)
            .field("disabled", "no"),
    )
    .await
}

pub async fn disable_hotspot_user(conn: &DeviceConnection, username: &str) -> Result<EnsureOutcome, CoreError> {
    if conn.find("/ip/hotspot/user", "name", username).await?.is_none() && !conn.is_dry_run() {
        warn!(host = %conn.host(), username, "hotspot user missing, nothing to disable");
        return Ok(EnsureOutcome::Skipped);
    }
    super::update_existing(
        conn,
        &ReconcileTarget::new("/ip/hotspot/user")
            .key("name", username)
            .field("disabled", "yes"),
    )
    .await
}

/// Kick every active hotspot session of `username`.
pub async fn remove_hotspot_session(conn: &DeviceConnection, username: &str) -> Result<EnsureOutcome, CoreError> {
    remove_sessions(conn, "/ip/hotspot/active", "user", username).await
}

pub(super) async fn remove_sessions(
    conn: &DeviceConnection,
    menu: &str,
    field: &str,
    value: &str,
) -> Result<EnsureOutcome, CoreError> {
    let sessions = conn.print(menu, &[(field, value)]).await?;
    if sessions.is_empty() {
        if conn.is_dry_run() {
            conn.remove(menu, value).await?;
            return Ok(EnsureOutcome::Updated);
        }
        info!(host = %conn.host(), menu, value, "no active session");
        return Ok(EnsureOutcome::Unchanged);
    }
    for id in sessions.iter().filter_map(|s| s.id()) {
        conn.remove(menu, id).await?;
    }
    info!(host = %conn.host(), menu, value, count = sessions.len(), "sessions removed");
    Ok(EnsureOutcome::Updated)
}
