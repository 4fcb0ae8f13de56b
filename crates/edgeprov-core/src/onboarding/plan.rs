// ── Sector configuration plan ──
//
// The sector profile is flattened into an ordered list of steps before
// anything touches a device. The same list drives the live apply, the
// `onboard plan` preview, and the manual runbook printed when a device
// cannot be configured.

use std::fmt;

use edgeprov_api::{Command, DeviceConnection};
use serde::Serialize;
use tracing::{debug, warn};

use super::config::SectorConfig;
use crate::error::CoreError;
use crate::model::non_empty;
use crate::reconcile::{
    DhcpServer, EnsureOutcome, HotspotProfile, HotspotServer, ensure_bridge, ensure_bridge_port,
    ensure_dhcp_client, ensure_dhcp_network, ensure_dhcp_server, ensure_dns, ensure_hotspot_profile,
    ensure_hotspot_server, ensure_ip_address, ensure_ip_pool, ensure_nat_masquerade, ensure_walled_garden,
};

pub const WAN_CLIENT_COMMENT: &str = "ISP-WAN";
pub const NAT_COMMENT: &str = "ISP-NAT";
pub const WALLED_GARDEN_COMMENT: &str = "ISP-WALLED-GARDEN";

/// One resource of the sector profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SectorStep {
    DhcpClient { interface: String },
    Bridge { name: String },
    BridgePort { bridge: String, interface: String },
    IpAddress { address: String, interface: String },
    IpPool { name: String, ranges: String },
    DhcpServer {
        name: String,
        interface: String,
        pool: String,
        lease_time: String,
    },
    DhcpNetwork { network: String, gateway: String, dns: String },
    Dns { servers: String },
    Nat { out_interface: String },
    HotspotProfile {
        name: String,
        dns_name: String,
        login_by: String,
        html_dir: String,
    },
    HotspotServer {
        name: String,
        interface: String,
        pool: String,
        profile: String,
    },
    WalledGarden { domain: String },
}

impl SectorStep {
    /// Failures are logged and the plan carries on.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Self::WalledGarden { .. })
    }

    /// Converge this step on the device.
    pub async fn apply(&self, conn: &DeviceConnection) -> Result<EnsureOutcome, CoreError> {
        match self {
            Self::DhcpClient { interface } => ensure_dhcp_client(conn, interface, WAN_CLIENT_COMMENT).await,
            Self::Bridge { name } => ensure_bridge(conn, name).await,
            Self::BridgePort { bridge, interface } => ensure_bridge_port(conn, bridge, interface).await,
            Self::IpAddress { address, interface } => ensure_ip_address(conn, address, interface).await,
            Self::IpPool { name, ranges } => ensure_ip_pool(conn, name, ranges).await,
            Self::DhcpServer {
                name,
                interface,
                pool,
                lease_time,
            } => {
                ensure_dhcp_server(
                    conn,
                    DhcpServer {
                        name,
                        interface,
                        pool,
                        lease_time,
                    },
                )
                .await
            }
            Self::DhcpNetwork { network, gateway, dns } => ensure_dhcp_network(conn, network, gateway, dns).await,
            Self::Dns { servers } => ensure_dns(conn, servers).await,
            Self::Nat { out_interface } => ensure_nat_masquerade(conn, out_interface, NAT_COMMENT).await,
            Self::HotspotProfile {
                name,
                dns_name,
                login_by,
                html_dir,
            } => {
                ensure_hotspot_profile(
                    conn,
                    HotspotProfile {
                        name,
                        dns_name,
                        login_by,
                        html_dir,
                    },
                )
                .await
            }
            Self::HotspotServer {
                name,
                interface,
                pool,
                profile,
            } => {
                ensure_hotspot_server(
                    conn,
                    HotspotServer {
                        name,
                        interface,
                        pool,
                        profile,
                    },
                )
                .await
            }
            Self::WalledGarden { domain } => ensure_walled_garden(conn, domain, WALLED_GARDEN_COMMENT).await,
        }
    }

    /// Console commands that create this step on a fresh device.
    pub fn commands(&self) -> Vec<Command> {
        let cmd = match self {
            Self::DhcpClient { interface } => Command::add("/ip/dhcp-client")
                .arg("interface", interface)
                .arg("disabled", "no")
                .arg("add-default-route", "yes")
                .arg("use-peer-dns", "yes")
                .arg("comment", WAN_CLIENT_COMMENT),
            Self::Bridge { name } => Command::add("/interface/bridge").arg("name", name),
            Self::BridgePort { bridge, interface } => Command::add("/interface/bridge/port")
                .arg("bridge", bridge)
                .arg("interface", interface),
            Self::IpAddress { address, interface } => Command::add("/ip/address")
                .arg("address", address)
                .arg("interface", interface),
            Self::IpPool { name, ranges } => Command::add("/ip/pool").arg("name", name).arg("ranges", ranges),
            Self::DhcpServer {
                name,
                interface,
                pool,
                lease_time,
            } => Command::add("/ip/dhcp-server")
                .arg("name", name)
                .arg("interface", interface)
                .arg("address-pool", pool)
                .arg("lease-time", lease_time)
                .arg("disabled", "no"),
            Self::DhcpNetwork { network, gateway, dns } => Command::add("/ip/dhcp-server/network")
                .arg("address", network)
                .arg("gateway", gateway)
                .arg("dns-server", dns),
            Self::Dns { servers } => Command::set("/ip/dns")
                .arg("servers", servers)
                .arg("allow-remote-requests", "yes"),
            Self::Nat { out_interface } => Command::add("/ip/firewall/nat")
                .arg("chain", "srcnat")
                .arg("out-interface", out_interface)
                .arg("action", "masquerade")
                .arg("comment", NAT_COMMENT),
            Self::HotspotProfile {
                name,
                dns_name,
                login_by,
                html_dir,
            } => Command::add("/ip/hotspot/profile")
                .arg("name", name)
                .arg("dns-name", dns_name)
                .arg("login-by", login_by)
                .arg("html-directory", html_dir),
            Self::HotspotServer {
                name,
                interface,
                pool,
                profile,
            } => Command::add("/ip/hotspot")
                .arg("name", name)
                .arg("interface", interface)
                .arg("address-pool", pool)
                .arg("profile", profile),
            Self::WalledGarden { domain } => Command::add("/ip/hotspot/walled-garden")
                .arg("dst-host", domain)
                .arg("comment", WALLED_GARDEN_COMMENT),
        };
        vec![cmd]
    }
}

impl fmt::Display for SectorStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DhcpClient { interface } => write!(f, "DHCP client on {interface}"),
            Self::Bridge { name } => write!(f, "bridge {name}"),
            Self::BridgePort { bridge, interface } => write!(f, "bridge port {interface} -> {bridge}"),
            Self::IpAddress { address, interface } => write!(f, "address {address} on {interface}"),
            Self::IpPool { name, ranges } => write!(f, "pool {name} ({ranges})"),
            Self::DhcpServer { name, interface, .. } => write!(f, "DHCP server {name} on {interface}"),
            Self::DhcpNetwork { network, gateway, .. } => write!(f, "DHCP network {network} via {gateway}"),
            Self::Dns { servers } => write!(f, "DNS servers {servers}"),
            Self::Nat { out_interface } => write!(f, "NAT masquerade out {out_interface}"),
            Self::HotspotProfile { name, .. } => write!(f, "hotspot profile {name}"),
            Self::HotspotServer { name, interface, .. } => write!(f, "hotspot server {name} on {interface}"),
            Self::WalledGarden { domain } => write!(f, "walled garden {domain}"),
        }
    }
}

/// A step that could not be applied, and where in the plan it sits.
#[derive(Debug)]
pub struct StepFailure {
    pub index: usize,
    pub step: SectorStep,
    pub error: CoreError,
}

/// Ordered sector configuration for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectorPlan {
    pub steps: Vec<SectorStep>,
    /// DHCP server the lease script is bound to.
    pub dhcp_server: String,
}

impl SectorPlan {
    /// Flatten a sector profile. `mgmt_interface` is left out of the LAN
    /// bridge so the device stays reachable.
    pub fn from_config(cfg: &SectorConfig, mgmt_interface: Option<&str>) -> Result<Self, CoreError> {
        let required = |value: &Option<String>, field: &str| {
            non_empty(value.as_deref())
                .map(str::to_owned)
                .ok_or_else(|| CoreError::config(format!("routeros.config.{field} is required")))
        };
        let wan = required(&cfg.wan_interface, "wan_interface")?;
        let bridge = required(&cfg.lan_bridge, "lan_bridge")?;
        let lan_address = required(&cfg.lan_address, "lan_address")?;
        let pool = required(&cfg.dhcp_pool, "dhcp_pool")?;
        let range = required(&cfg.dhcp_range, "dhcp_range")?;
        let server = required(&cfg.dhcp_server, "dhcp_server")?;
        let network = required(&cfg.dhcp_network, "dhcp_network")?;

        let gateway = lan_address
            .split_once('/')
            .map_or(lan_address.as_str(), |(ip, _)| ip)
            .to_owned();
        let dns_server = non_empty(cfg.dns_server.as_deref()).map(str::to_owned);

        let mut steps = Vec::new();
        if cfg.enable_dhcp_client_wan {
            steps.push(SectorStep::DhcpClient { interface: wan.clone() });
        }
        steps.push(SectorStep::Bridge { name: bridge.clone() });
        for port in &cfg.lan_ports {
            if Some(port.as_str()) == mgmt_interface {
                warn!(interface = %port, "management interface kept out of the LAN bridge");
                continue;
            }
            steps.push(SectorStep::BridgePort {
                bridge: bridge.clone(),
                interface: port.clone(),
            });
        }
        steps.push(SectorStep::IpAddress {
            address: lan_address.clone(),
            interface: bridge.clone(),
        });
        steps.push(SectorStep::IpPool {
            name: pool.clone(),
            ranges: range,
        });
        steps.push(SectorStep::DhcpServer {
            name: server.clone(),
            interface: bridge.clone(),
            pool: pool.clone(),
            lease_time: cfg.dhcp_lease_time.clone(),
        });
        steps.push(SectorStep::DhcpNetwork {
            network,
            gateway: gateway.clone(),
            dns: dns_server.clone().unwrap_or(gateway),
        });
        if let Some(servers) = dns_server {
            steps.push(SectorStep::Dns { servers });
        }
        if cfg.enable_nat {
            steps.push(SectorStep::Nat { out_interface: wan });
        }
        if cfg.enable_hotspot {
            let dns_name = non_empty(cfg.hotspot_dns_name.as_deref()).ok_or_else(|| {
                CoreError::config("routeros.config.hotspot_dns_name is required when enable_hotspot is true")
            })?;
            steps.push(SectorStep::HotspotProfile {
                name: cfg.hotspot_profile.clone(),
                dns_name: dns_name.to_owned(),
                login_by: cfg.hotspot_login_by.clone(),
                html_dir: cfg.hotspot_html_dir.clone(),
            });
            steps.push(SectorStep::HotspotServer {
                name: cfg.hotspot_server.clone(),
                interface: bridge,
                pool,
                profile: cfg.hotspot_profile.clone(),
            });
            if let Some(domain) = non_empty(cfg.hotspot_walled_garden.as_deref()) {
                steps.push(SectorStep::WalledGarden {
                    domain: domain.to_owned(),
                });
            }
        }

        Ok(Self {
            steps,
            dhcp_server: server,
        })
    }

    /// Apply every step in order. Stops at the first required step that
    /// fails; best-effort steps only warn.
    pub async fn apply(&self, conn: &DeviceConnection) -> Result<Vec<EnsureOutcome>, StepFailure> {
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for (index, step) in self.steps.iter().enumerate() {
            match step.apply(conn).await {
                Ok(outcome) => {
                    debug!(host = %conn.host(), %step, ?outcome, "sector step");
                    outcomes.push(outcome);
                }
                Err(error) if step.is_best_effort() => {
                    warn!(host = %conn.host(), %step, %error, "best-effort sector step failed");
                    outcomes.push(EnsureOutcome::Skipped);
                }
                Err(error) => {
                    return Err(StepFailure {
                        index,
                        step: step.clone(),
                        error,
                    });
                }
            }
        }
        Ok(outcomes)
    }

    /// Steps from `index` onwards.
    pub fn remaining(&self, index: usize) -> &[SectorStep] {
        self.steps.get(index..).unwrap_or(&[])
    }

    /// Console commands for the whole plan.
    pub fn render(&self) -> Vec<String> {
        render_steps(&self.steps)
    }
}

/// Console commands for a run of steps.
pub fn render_steps(steps: &[SectorStep]) -> Vec<String> {
    steps
        .iter()
        .flat_map(SectorStep::commands)
        .map(|cmd| cmd.to_string())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::sim;
    use pretty_assertions::assert_eq;

    fn sector() -> SectorConfig {
        SectorConfig {
            wan_interface: Some("ether1".into()),
            lan_bridge: Some("bridge-lan".into()),
            lan_ports: vec!["ether1".into(), "ether2".into(), "ether3".into()],
            lan_address: Some("10.20.0.1/24".into()),
            dhcp_pool: Some("pool-lan".into()),
            dhcp_range: Some("10.20.0.10-10.20.0.250".into()),
            dhcp_server: Some("dhcp-lan".into()),
            dhcp_network: Some("10.20.0.0/24".into()),
            ..SectorConfig::default()
        }
    }

    #[test]
    fn management_interface_stays_out_of_the_bridge() {
        let plan = SectorPlan::from_config(&sector(), Some("ether1")).unwrap();
        let ports: Vec<&str> = plan
            .steps
            .iter()
            .filter_map(|s| match s {
                SectorStep::BridgePort { interface, .. } => Some(interface.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ports, vec!["ether2", "ether3"]);
    }

    #[test]
    fn dhcp_network_defaults_dns_to_the_gateway() {
        let plan = SectorPlan::from_config(&sector(), None).unwrap();
        assert!(plan.steps.contains(&SectorStep::DhcpNetwork {
            network: "10.20.0.0/24".into(),
            gateway: "10.20.0.1".into(),
            dns: "10.20.0.1".into(),
        }));
        assert!(!plan.steps.iter().any(|s| matches!(s, SectorStep::Dns { .. })));
    }

    #[test]
    fn missing_required_field_is_config_error() {
        let mut cfg = sector();
        cfg.dhcp_pool = Some(String::new());
        let err = SectorPlan::from_config(&cfg, None).unwrap_err();
        assert!(err.to_string().contains("dhcp_pool"));

        let mut cfg = sector();
        cfg.enable_hotspot = true;
        assert!(SectorPlan::from_config(&cfg, None).unwrap_err().is_config());
    }

    #[test]
    fn render_produces_console_commands() {
        let mut cfg = sector();
        cfg.lan_ports = vec!["ether2".into()];
        cfg.enable_dhcp_client_wan = false;
        cfg.enable_nat = false;
        let plan = SectorPlan::from_config(&cfg, None).unwrap();
        insta::assert_snapshot!(plan.render().join("\n"), @r#"
        /interface bridge add name=bridge-lan
        /interface bridge port add bridge=bridge-lan interface=ether2
        /ip address add address=10.20.0.1/24 interface=bridge-lan
        /ip pool add name=pool-lan ranges=10.20.0.10-10.20.0.250
        /ip dhcp-server add name=dhcp-lan interface=bridge-lan address-pool=pool-lan lease-time=1h disabled=no
        /ip dhcp-server network add address=10.20.0.0/24 gateway=10.20.0.1 dns-server=10.20.0.1
        "#);
    }

    #[tokio::test]
    async fn apply_converges_and_is_idempotent() {
        let (dev, conn) = sim();
        let mut cfg = sector();
        cfg.enable_hotspot = true;
        cfg.hotspot_dns_name = Some("login.isp.example".into());
        cfg.hotspot_walled_garden = Some("pay.isp.example".into());
        let plan = SectorPlan::from_config(&cfg, Some("ether1")).unwrap();

        let first = plan.apply(&conn).await.unwrap();
        assert!(first.iter().all(|o| o.changed()));
        dev.clear_log();

        let second = plan.apply(&conn).await.unwrap();
        assert!(second.iter().all(|o| !o.changed()), "{second:?}");
        assert!(dev.mutations().is_empty());
        assert_eq!(dev.records("/ip/hotspot").len(), 1);
        assert_eq!(dev.records("/ip/firewall/nat").len(), 1);
    }

    #[tokio::test]
    async fn failure_reports_the_step_and_best_effort_carries_on() {
        let (dev, conn) = sim();
        let mut cfg = sector();
        cfg.enable_hotspot = true;
        cfg.hotspot_dns_name = Some("login.isp.example".into());
        cfg.hotspot_walled_garden = Some("pay.isp.example".into());
        let plan = SectorPlan::from_config(&cfg, None).unwrap();

        dev.fail_next("/ip/hotspot/walled-garden/add", 1, "failure: hotspot package disabled");
        let outcomes = plan.apply(&conn).await.unwrap();
        assert_eq!(outcomes.last(), Some(&EnsureOutcome::Skipped));

        dev.fail_next("/ip/pool/print", 1, "failure: timeout");
        let failure = plan.apply(&conn).await.unwrap_err();
        assert!(matches!(failure.step, SectorStep::IpPool { .. }));
        assert_eq!(plan.remaining(failure.index)[0], failure.step);
    }
}
