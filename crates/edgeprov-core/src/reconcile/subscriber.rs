// ── Per-subscriber device state: PPP secrets, simple queues, sessions ──

use edgeprov_api::DeviceConnection;
use tracing::{info, warn};

use super::hotspot::remove_sessions;
use super::{EnsureOutcome, ReconcileTarget, ensure, update_existing};
use crate::error::CoreError;

const SECRETS: &str = "/ppp/secret";
const QUEUES: &str = "/queue/simple";

/// Enabled PPPoE secret with the given password and profile.
pub async fn ensure_ppp_secret(
    conn: &DeviceConnection,
    name: &str,
    password: &str,
    profile: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new(SECRETS)
            .key("name", name)
            .field("password", password)
            .field("profile", profile)
            .field("service", "pppoe")
            .field("disabled", "no"),
    )
    .await
}

/// Enable or disable an existing secret. A missing secret is skipped.
pub async fn set_ppp_secret_disabled(
    conn: &DeviceConnection,
    name: &str,
    disabled: bool,
) -> Result<EnsureOutcome, CoreError> {
    set_disabled(conn, SECRETS, name, disabled).await
}

/// Simple queue capping `ip` at `max_limit`.
pub async fn ensure_queue(
    conn: &DeviceConnection,
    name: &str,
    ip: &str,
    max_limit: &str,
    comment: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new(QUEUES)
            .key("name", name)
            .field("target", format!("{ip}/32"))
            .field("max-limit", max_limit)
            .field("comment", comment)
            .field("disabled", "no"),
    )
    .await
}

pub async fn disable_queue(conn: &DeviceConnection, name: &str) -> Result<EnsureOutcome, CoreError> {
    set_disabled(conn, QUEUES, name, true).await
}

pub async fn remove_queue(conn: &DeviceConnection, name: &str) -> Result<EnsureOutcome, CoreError> {
    if conn.is_dry_run() {
        conn.remove(QUEUES, name).await?;
        return Ok(EnsureOutcome::Updated);
    }
    let Some(id) = conn
        .find(QUEUES, "name", name)
        .await?
        .and_then(|row| row.id().map(str::to_owned))
    else {
        warn!(host = %conn.host(), queue = name, "queue missing, nothing to remove");
        return Ok(EnsureOutcome::Skipped);
    };
    conn.remove(QUEUES, &id).await?;
    info!(host = %conn.host(), queue = name, "queue removed");
    Ok(EnsureOutcome::Updated)
}

/// Kick every active PPP session of `name`.
pub async fn remove_ppp_session(conn: &DeviceConnection, name: &str) -> Result<EnsureOutcome, CoreError> {
    remove_sessions(conn, "/ppp/active", "name", name).await
}

async fn set_disabled(
    conn: &DeviceConnection,
    menu: &str,
    name: &str,
    disabled: bool,
) -> Result<EnsureOutcome, CoreError> {
    if !conn.is_dry_run() && conn.find(menu, "name", name).await?.is_none() {
        warn!(host = %conn.host(), menu, name, disabled, "entry missing, state change skipped");
        return Ok(EnsureOutcome::Skipped);
    }
    update_existing(
        conn,
        &ReconcileTarget::new(menu)
            .key("name", name)
            .field("disabled", if disabled { "yes" } else { "no" }),
    )
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::sim;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn secret_create_then_password_change() {
        let (dev, conn) = sim();
        assert_eq!(
            ensure_ppp_secret(&conn, "jdoe", "s3cret", "10M").await.unwrap(),
            EnsureOutcome::Created
        );
        assert_eq!(
            ensure_ppp_secret(&conn, "jdoe", "s3cret", "10M").await.unwrap(),
            EnsureOutcome::Unchanged
        );
        assert_eq!(
            ensure_ppp_secret(&conn, "jdoe", "n3w", "10M").await.unwrap(),
            EnsureOutcome::Updated
        );
        let rows = dev.records(SECRETS);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("password"), Some("n3w"));
        assert_eq!(rows[0].get("service"), Some("pppoe"));
    }

    #[tokio::test]
    async fn suspend_and_reconnect_toggle_disabled() {
        let (dev, conn) = sim();
        assert_eq!(
            set_ppp_secret_disabled(&conn, "ghost", true).await.unwrap(),
            EnsureOutcome::Skipped
        );
        ensure_ppp_secret(&conn, "jdoe", "pw", "default").await.unwrap();
        set_ppp_secret_disabled(&conn, "jdoe", true).await.unwrap();
        assert_eq!(dev.records(SECRETS)[0].get("disabled"), Some("yes"));
        set_ppp_secret_disabled(&conn, "jdoe", false).await.unwrap();
        assert_eq!(dev.records(SECRETS)[0].get("disabled"), Some("no"));
    }

    #[tokio::test]
    async fn queue_lifecycle() {
        let (dev, conn) = sim();
        ensure_queue(&conn, "SUB-0001", "10.10.0.20", "50M/10M", "SUB-0001")
            .await
            .unwrap();
        assert_eq!(dev.records(QUEUES)[0].get("target"), Some("10.10.0.20/32"));

        assert_eq!(disable_queue(&conn, "SUB-0001").await.unwrap(), EnsureOutcome::Updated);
        assert_eq!(
            ensure_queue(&conn, "SUB-0001", "10.10.0.20", "100M/20M", "SUB-0001")
                .await
                .unwrap(),
            EnsureOutcome::Updated
        );
        let row = &dev.records(QUEUES)[0];
        assert_eq!(row.get("max-limit"), Some("100M/20M"));
        assert_eq!(row.get("disabled"), Some("no"));

        assert_eq!(remove_queue(&conn, "SUB-0001").await.unwrap(), EnsureOutcome::Updated);
        assert_eq!(remove_queue(&conn, "SUB-0001").await.unwrap(), EnsureOutcome::Skipped);
        assert!(dev.records(QUEUES).is_empty());
    }
}
