// ── Idempotent reconciliation primitives ──
//
// RouterOS has no upsert: `add` traps when the key exists and `set` traps
// when it does not. Every `ensure_*` here converges one resource with the
// same recipe: look it up, diff, and send only what changed; create when
// absent; and when a create loses to an existing entry, look it up again
// and update instead.

pub mod firewall;
pub mod hotspot;
pub mod network;
pub mod subscriber;
pub mod system;

use edgeprov_api::{DeviceConnection, Record, TrapKind};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CoreError;

pub use firewall::{ensure_firewall_allow, ensure_firewall_drop};
pub use hotspot::{
    HotspotProfile, HotspotServer, disable_hotspot_user, ensure_hotspot_profile,
    ensure_hotspot_server, ensure_hotspot_user, ensure_walled_garden, remove_hotspot_session,
};
pub use network::{
    DhcpServer, bind_dhcp_lease_script, ensure_bridge, ensure_bridge_port, ensure_dhcp_client,
    ensure_dhcp_network, ensure_dhcp_server, ensure_dns, ensure_interface_list,
    ensure_interface_list_member, ensure_ip_address, ensure_ip_pool, ensure_nat_masquerade,
    ensure_static_lease,
};
pub use subscriber::{
    disable_queue, ensure_ppp_secret, ensure_queue, remove_ppp_session, remove_queue,
    set_ppp_secret_disabled,
};
pub use system::{
    ensure_api_service, ensure_identity, ensure_scheduler, ensure_script, ensure_user,
    ensure_user_group, restrict_discovery, run_script,
};

/// What an `ensure_*` call did to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    Created,
    Updated,
    Unchanged,
    /// Soft skip: a prerequisite was missing; a warning was logged.
    Skipped,
}

impl EnsureOutcome {
    pub fn changed(self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

/// One resource to converge: where it lives, how to find it, and the
/// field values it should end up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileTarget {
    pub menu: String,
    /// ANDed `field = value` lookup predicate.
    pub lookup: Vec<(String, String)>,
    pub desired: Vec<(String, String)>,
}

impl ReconcileTarget {
    pub fn new(menu: impl Into<String>) -> Self {
        Self {
            menu: menu.into(),
            lookup: Vec::new(),
            desired: Vec::new(),
        }
    }

    /// Add a lookup term. Lookup values are also sent on create.
    pub fn key(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.lookup.push((field.into(), value.into()));
        self
    }

    pub fn field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.desired.push((field.into(), value.into()));
        self
    }

    fn create_fields(&self) -> Vec<(&str, &str)> {
        let mut fields: Vec<(&str, &str)> = self
            .lookup
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        for (k, v) in &self.desired {
            if !fields.iter().any(|(existing, _)| existing == k) {
                fields.push((k.as_str(), v.as_str()));
            }
        }
        fields
    }

    fn lookup_pairs(&self) -> Vec<(&str, &str)> {
        self.lookup
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

// ── Generic recipes ─────────────────────────────────────────────────

/// First row matching the target's lookup predicate.
pub async fn find(conn: &DeviceConnection, target: &ReconcileTarget) -> Result<Option<Record>, CoreError> {
    let rows = conn.print(&target.menu, &target.lookup_pairs()).await?;
    Ok(rows.into_iter().next())
}

/// Find-or-create / find-or-update.
pub async fn ensure(conn: &DeviceConnection, target: &ReconcileTarget) -> Result<EnsureOutcome, CoreError> {
    if let Some(existing) = find(conn, target).await? {
        return update_changed(conn, target, &existing).await;
    }

    match conn.add(&target.menu, &target.create_fields()).await {
        Ok(_) => {
            debug!(host = %conn.host(), menu = %target.menu, lookup = ?target.lookup, "created");
            Ok(EnsureOutcome::Created)
        }
        Err(err) if err.is_already_exists() => {
            debug!(
                host = %conn.host(),
                menu = %target.menu,
                "create reported existing entry, updating instead"
            );
            match find(conn, target).await? {
                Some(existing) => update_changed(conn, target, &existing).await,
                None => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Create-only resources matched by `comment`: present means done.
pub async fn ensure_tagged(
    conn: &DeviceConnection,
    menu: &str,
    comment: &str,
    fields: &[(&str, &str)],
) -> Result<EnsureOutcome, CoreError> {
    if conn.find(menu, "comment", comment).await?.is_some() {
        debug!(host = %conn.host(), menu, comment, "tagged entry present");
        return Ok(EnsureOutcome::Unchanged);
    }
    let mut create: Vec<(&str, &str)> = fields.to_vec();
    create.push(("comment", comment));
    conn.add(menu, &create).await?;
    debug!(host = %conn.host(), menu, comment, "tagged entry created");
    Ok(EnsureOutcome::Created)
}

/// Converge a singleton settings menu (`/system/identity`, `/ip/dns`, ...).
pub async fn ensure_settings(
    conn: &DeviceConnection,
    menu: &str,
    desired: &[(&str, &str)],
) -> Result<EnsureOutcome, CoreError> {
    let current = conn.print(menu, &[]).await?.into_iter().next().unwrap_or_default();
    let changed: Vec<(&str, &str)> = desired
        .iter()
        .copied()
        .filter(|(k, v)| !values_equal(current.get(k), v))
        .collect();
    if changed.is_empty() {
        return Ok(EnsureOutcome::Unchanged);
    }
    conn.set_settings(menu, &changed).await?;
    Ok(EnsureOutcome::Updated)
}

/// Update an entry that must already exist (never created here).
///
/// A dry-run connection sends the `set` by key so the intent is logged.
pub async fn update_existing(
    conn: &DeviceConnection,
    target: &ReconcileTarget,
) -> Result<EnsureOutcome, CoreError> {
    if let Some(existing) = find(conn, target).await? {
        return update_changed(conn, target, &existing).await;
    }
    if conn.is_dry_run() {
        let key = target.lookup.first().map_or("", |(_, v)| v.as_str());
        let fields: Vec<(&str, &str)> = target
            .desired
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        conn.set(&target.menu, key, &fields).await?;
        return Ok(EnsureOutcome::Updated);
    }
    Err(CoreError::DeviceRejected {
        path: format!("{}/set", target.menu),
        kind: TrapKind::NotFound,
        message: format!("no entry matching {:?}", target.lookup),
    })
}

/// Move `id` to the top of `menu` unless it is already first.
pub async fn move_to_front(conn: &DeviceConnection, menu: &str, id: &str) -> Result<bool, CoreError> {
    let rows = conn.print(menu, &[]).await?;
    let Some(first) = rows.first().and_then(Record::id) else {
        return Ok(false);
    };
    if first == id {
        return Ok(false);
    }
    conn.move_before(menu, id, first).await?;
    debug!(host = %conn.host(), menu, id, before = first, "moved to front");
    Ok(true)
}

async fn update_changed(
    conn: &DeviceConnection,
    target: &ReconcileTarget,
    existing: &Record,
) -> Result<EnsureOutcome, CoreError> {
    let changed: Vec<(&str, &str)> = target
        .desired
        .iter()
        .filter(|(k, v)| !values_equal(existing.get(k), v))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    if changed.is_empty() {
        return Ok(EnsureOutcome::Unchanged);
    }
    let Some(id) = existing.id() else {
        warn!(host = %conn.host(), menu = %target.menu, "matched entry has no .id, cannot update");
        return Err(CoreError::Protocol {
            message: format!("{} entry without .id", target.menu),
        });
    };
    conn.set(&target.menu, id, &changed).await?;
    debug!(host = %conn.host(), menu = %target.menu, id, fields = ?changed, "updated");
    Ok(EnsureOutcome::Updated)
}

// ── Value helpers ───────────────────────────────────────────────────

/// Compare a device value with a desired value. RouterOS prints booleans
/// as `true`/`false` but accepts `yes`/`no`; a missing field equals `""`.
pub fn values_equal(current: Option<&str>, desired: &str) -> bool {
    let current = current.unwrap_or("");
    canonical_bool(current).map_or(current == desired, |c| {
        canonical_bool(desired).is_some_and(|d| c == d)
    })
}

fn canonical_bool(value: &str) -> Option<bool> {
    match value {
        "yes" | "true" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated list, trimming blanks. Order and duplicates are
/// kept.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Bandwidth in RouterOS `max-limit` form.
pub fn bandwidth(download_mbps: u32, upload_mbps: u32) -> String {
    format!("{download_mbps}M/{upload_mbps}M")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::sim;

    fn pool(ranges: &str) -> ReconcileTarget {
        ReconcileTarget::new("/ip/pool")
            .key("name", "pool-lan")
            .field("ranges", ranges)
    }

    #[tokio::test]
    async fn ensure_twice_creates_once_and_sends_nothing_second_time() {
        let (dev, conn) = sim();
        assert_eq!(ensure(&conn, &pool("10.0.0.10-10.0.0.99")).await.unwrap(), EnsureOutcome::Created);
        dev.clear_log();
        assert_eq!(ensure(&conn, &pool("10.0.0.10-10.0.0.99")).await.unwrap(), EnsureOutcome::Unchanged);
        assert!(dev.mutations().is_empty());
        assert_eq!(dev.records("/ip/pool").len(), 1);
    }

    #[tokio::test]
    async fn ensure_updates_only_changed_fields() {
        let (dev, conn) = sim();
        ensure(
            &conn,
            &pool("10.0.0.10-10.0.0.99").field("comment", "LAN"),
        )
        .await
        .unwrap();
        dev.clear_log();

        let outcome = ensure(&conn, &pool("10.0.0.10-10.0.0.200").field("comment", "LAN"))
            .await
            .unwrap();
        assert_eq!(outcome, EnsureOutcome::Updated);
        let sets = dev.mutations();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].get("ranges"), Some("10.0.0.10-10.0.0.200"));
        assert_eq!(sets[0].get("comment"), None);
    }

    #[tokio::test]
    async fn create_race_falls_back_to_update() {
        let (dev, conn) = sim();
        dev.execute(&edgeprov_api::Command::add("/ip/pool").arg("name", "pool-lan").arg("ranges", "a-b"))
            .unwrap();
        // The lookup misses the entry, so the add collides with it.
        dev.stale_reads("/ip/pool", 1);

        let outcome = ensure(&conn, &pool("c-d")).await.unwrap();
        assert_eq!(outcome, EnsureOutcome::Updated);
        let rows = dev.records("/ip/pool");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ranges"), Some("c-d"));
    }

    #[tokio::test]
    async fn tagged_entries_are_create_only() {
        let (dev, conn) = sim();
        let fields = [("chain", "srcnat"), ("action", "masquerade"), ("out-interface", "ether1")];
        assert_eq!(
            ensure_tagged(&conn, "/ip/firewall/nat", "ISP-NAT", &fields).await.unwrap(),
            EnsureOutcome::Created
        );
        let changed = [("chain", "srcnat"), ("action", "masquerade"), ("out-interface", "ether2")];
        assert_eq!(
            ensure_tagged(&conn, "/ip/firewall/nat", "ISP-NAT", &changed).await.unwrap(),
            EnsureOutcome::Unchanged
        );
        let rows = dev.records("/ip/firewall/nat");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("out-interface"), Some("ether1"));
    }

    #[tokio::test]
    async fn dry_run_always_creates() {
        let conn = DeviceConnection::dry_run("10.0.0.9");
        assert_eq!(ensure(&conn, &pool("a-b")).await.unwrap(), EnsureOutcome::Created);
        assert_eq!(ensure(&conn, &pool("a-b")).await.unwrap(), EnsureOutcome::Created);
    }

    #[test]
    fn boolean_spellings_compare_equal() {
        assert!(values_equal(Some("false"), "no"));
        assert!(values_equal(Some("true"), "yes"));
        assert!(!values_equal(Some("true"), "no"));
        assert!(values_equal(None, ""));
        assert!(!values_equal(None, "no"));
    }

    #[test]
    fn lists_keep_order_and_duplicates() {
        assert_eq!(parse_list("ether2, ether3,,ether2 "), vec!["ether2", "ether3", "ether2"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn bandwidth_format() {
        assert_eq!(bandwidth(50, 10), "50M/10M");
    }
}
