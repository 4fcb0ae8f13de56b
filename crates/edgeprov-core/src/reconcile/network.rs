// ── Bridge, addressing, DHCP, NAT, DNS ──

use edgeprov_api::DeviceConnection;
use tracing::{info, warn};

use super::{EnsureOutcome, ReconcileTarget, ensure, ensure_settings, ensure_tagged, update_existing};
use crate::error::CoreError;

pub async fn ensure_bridge(conn: &DeviceConnection, name: &str) -> Result<EnsureOutcome, CoreError> {
    ensure(conn, &ReconcileTarget::new("/interface/bridge").key("name", name)).await
}

/// Attach `interface` to `bridge`. A missing interface is a soft skip.
pub async fn ensure_bridge_port(
    conn: &DeviceConnection,
    bridge: &str,
    interface: &str,
) -> Result<EnsureOutcome, CoreError> {
    if !conn.is_dry_run() && conn.find("/interface", "name", interface).await?.is_none() {
        warn!(host = %conn.host(), interface, bridge, "interface missing, bridge port skipped");
        return Ok(EnsureOutcome::Skipped);
    }
    ensure(
        conn,
        &ReconcileTarget::new("/interface/bridge/port")
            .key("interface", interface)
            .field("bridge", bridge),
    )
    .await
}

pub async fn ensure_ip_address(
    conn: &DeviceConnection,
    address: &str,
    interface: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/address")
            .key("address", address)
            .field("interface", interface),
    )
    .await
}

pub async fn ensure_ip_pool(conn: &DeviceConnection, name: &str, ranges: &str) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/pool")
            .key("name", name)
            .field("ranges", ranges),
    )
    .await
}

/// DHCP server definition.
#[derive(Debug, Clone, Copy)]
pub struct DhcpServer<'a> {
    pub name: &'a str,
    pub interface: &'a str,
    pub pool: &'a str,
    pub lease_time: &'a str,
}

pub async fn ensure_dhcp_server(conn: &DeviceConnection, server: DhcpServer<'_>) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/dhcp-server")
            .key("name", server.name)
            .field("interface", server.interface)
            .field("address-pool", server.pool)
            .field("lease-time", server.lease_time)
            .field("disabled", "no"),
    )
    .await
}

pub async fn ensure_dhcp_network(
    conn: &DeviceConnection,
    network: &str,
    gateway: &str,
    dns_server: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/dhcp-server/network")
            .key("address", network)
            .field("gateway", gateway)
            .field("dns-server", dns_server),
    )
    .await
}

/// DHCP client on the WAN port. An existing client on the interface is
/// left as the operator configured it.
pub async fn ensure_dhcp_client(
    conn: &DeviceConnection,
    interface: &str,
    comment: &str,
) -> Result<EnsureOutcome, CoreError> {
    if conn.find("/ip/dhcp-client", "interface", interface).await?.is_some() {
        return Ok(EnsureOutcome::Unchanged);
    }
    ensure(
        conn,
        &ReconcileTarget::new("/ip/dhcp-client")
            .key("interface", interface)
            .field("disabled", "no")
            .field("add-default-route", "yes")
            .field("use-peer-dns", "yes")
            .field("comment", comment),
    )
    .await
}

pub async fn ensure_nat_masquerade(
    conn: &DeviceConnection,
    out_interface: &str,
    comment: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure_tagged(
        conn,
        "/ip/firewall/nat",
        comment,
        &[
            ("chain", "srcnat"),
            ("out-interface", out_interface),
            ("action", "masquerade"),
        ],
    )
    .await
}

pub async fn ensure_dns(conn: &DeviceConnection, servers: &str) -> Result<EnsureOutcome, CoreError> {
    ensure_settings(
        conn,
        "/ip/dns",
        &[("servers", servers), ("allow-remote-requests", "yes")],
    )
    .await
}

/// Bind (or with `None`, clear) the lease script of an existing DHCP
/// server.
pub async fn bind_dhcp_lease_script(
    conn: &DeviceConnection,
    server: &str,
    script: Option<&str>,
) -> Result<EnsureOutcome, CoreError> {
    let outcome = update_existing(
        conn,
        &ReconcileTarget::new("/ip/dhcp-server")
            .key("name", server)
            .field("lease-script", script.unwrap_or("")),
    )
    .await?;
    if outcome.changed() {
        info!(host = %conn.host(), server, bound = script.is_some(), "dhcp lease script updated");
    }
    Ok(outcome)
}

pub async fn ensure_interface_list(conn: &DeviceConnection, name: &str) -> Result<EnsureOutcome, CoreError> {
    ensure(conn, &ReconcileTarget::new("/interface/list").key("name", name)).await
}

pub async fn ensure_interface_list_member(
    conn: &DeviceConnection,
    list: &str,
    interface: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/interface/list/member")
            .key("list", list)
            .key("interface", interface),
    )
    .await
}

/// Static DHCP lease pinning `mac` to `address`.
pub async fn ensure_static_lease(
    conn: &DeviceConnection,
    mac: &str,
    address: &str,
    comment: &str,
) -> Result<EnsureOutcome, CoreError> {
    ensure(
        conn,
        &ReconcileTarget::new("/ip/dhcp-server/lease")
            .key("mac-address", mac)
            .field("address", address)
            .field("comment", comment)
            .field("disabled", "no"),
    )
    .await
}
