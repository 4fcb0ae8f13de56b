// ── Device onboarding ──
//
// Discover candidates on the management subnet, then take each one through
// login, bootstrap, firewall, sector configuration, scripts and directory
// registration. Candidates are handled one at a time; a failure stops that
// candidate only and is recorded in the scan report.

pub mod config;
pub mod plan;
pub mod register;
pub mod report;
pub mod runbook;
pub mod scan;
pub mod scripts;

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use edgeprov_api::{Command, ConnectionInfo, DeviceConnection};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::connector::DeviceConnector;
use crate::error::CoreError;
use crate::merge::merge;
use crate::model::{MacAddress, non_empty};
use crate::reconcile::{
    bind_dhcp_lease_script, ensure_api_service, ensure_firewall_allow, ensure_firewall_drop, ensure_identity,
    ensure_scheduler, ensure_script, ensure_user, ensure_user_group, restrict_discovery, run_script,
};

pub use config::{OnboardingConfig, OnboardingSecrets, SectorConfig};
pub use plan::{SectorPlan, SectorStep};
pub use register::{Directory, MemoryDirectory, OdooDirectory};
pub use report::{
    CandidateFailure, CandidateOutcome, OnboardedDevice, OnboardingFailure, OnboardingStep, Registration,
    ScanReport, SkippedCandidate,
};
pub use runbook::Runbook;

pub const ALLOW_API_COMMENT: &str = "ALLOW ODOO/NOC API";
pub const DROP_API_COMMENT: &str = "DROP API OTHERS";

/// Type the local onboarding document, layering the directory's sector
/// profile on top when `odoo.fetch_preconfig` asks for it.
pub async fn load_profile(local: &Value, directory: Option<&dyn Directory>) -> Result<OnboardingConfig, CoreError> {
    let base = OnboardingConfig::from_value(local.clone())?;
    let fetch = base.directory.as_ref().is_some_and(|d| d.fetch_preconfig);
    let Some(directory) = directory.filter(|_| fetch) else {
        return Ok(base);
    };
    let remote = directory.fetch_preconfig(&base.sector_code).await?;
    debug!(
        sector = %base.sector_code,
        keys = remote.as_object().map_or(0, serde_json::Map::len),
        "remote profile fetched"
    );
    OnboardingConfig::from_value(merge(local, &remote))
}

fn at(step: OnboardingStep) -> impl Fn(CoreError) -> OnboardingFailure {
    move |error| OnboardingFailure::at(step, error)
}

/// Runs onboarding for one profile.
pub struct Orchestrator {
    config: OnboardingConfig,
    secrets: OnboardingSecrets,
    connector: Arc<dyn DeviceConnector>,
    directory: Option<Arc<dyn Directory>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("subnet", &self.config.mgmt_subnet)
            .field("sector", &self.config.sector_code)
            .field("directory", &self.directory.is_some())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        config: OnboardingConfig,
        secrets: OnboardingSecrets,
        connector: Arc<dyn DeviceConnector>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self {
            config,
            secrets,
            connector,
            directory: None,
        })
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn config(&self) -> &OnboardingConfig {
        &self.config
    }

    fn bootstrap_info(&self, ip: Ipv4Addr) -> ConnectionInfo {
        ConnectionInfo::new(
            ip.to_string(),
            self.config.routeros.api_port,
            &self.config.bootstrap.user,
            self.secrets.bootstrap_password.clone(),
        )
    }

    fn mgmt_info(&self, ip: Ipv4Addr) -> ConnectionInfo {
        ConnectionInfo::new(
            ip.to_string(),
            self.config.routeros.api_port,
            &self.config.routeros.mgmt_user,
            self.secrets.mgmt_password.clone(),
        )
    }

    // ── Scan ────────────────────────────────────────────────────────

    pub async fn run_scan(&self) -> Result<ScanReport, CoreError> {
        self.run_scan_with(|_, _| {}).await
    }

    /// Scan the management subnet and onboard every candidate.
    /// `on_probe` sees each probed address and whether it answered.
    pub async fn run_scan_with(&self, on_probe: impl FnMut(Ipv4Addr, bool)) -> Result<ScanReport, CoreError> {
        let subnet = self.config.mgmt_subnet.as_str();
        let mut report = ScanReport::new(subnet);
        report.scanned = scan::hosts(subnet)?.len();
        report.candidates =
            scan::scan(self.connector.as_ref(), subnet, self.config.routeros.api_port, on_probe).await?;
        info!(subnet, candidates = report.candidates.len(), "scan finished");

        for ip in report.candidates.clone() {
            match self.onboard(ip).await {
                Ok(CandidateOutcome::Completed(device)) => report.completed.push(device),
                Ok(CandidateOutcome::Skipped(skipped)) => report.skipped.push(skipped),
                Err(failure) => {
                    warn!(%ip, step = %failure.step, error = %failure.error, "onboarding failed");
                    report.failed.push(failure.into_candidate(ip));
                }
            }
        }
        Ok(report)
    }

    // ── Single device ───────────────────────────────────────────────

    /// Onboard the device at `ip`.
    pub async fn onboard(&self, ip: Ipv4Addr) -> Result<CandidateOutcome, OnboardingFailure> {
        let host = ip.to_string();
        let identity = self.config.identity_for(ip);
        let ros = &self.config.routeros;

        let mut conn = self.login(ip).await.map_err(at(OnboardingStep::Connect))?;

        if let Some(target) = non_empty(self.config.target_mac.as_deref()) {
            let target = MacAddress::new(target);
            if !has_mac(&conn, &target).await.map_err(at(OnboardingStep::Filter))? {
                info!(host, target_mac = %target, "target MAC not present, skipped");
                return Ok(CandidateOutcome::Skipped(SkippedCandidate {
                    ip,
                    reason: format!("no interface with MAC {target}"),
                }));
            }
        }

        let mgmt_interface = self
            .bootstrap(&conn, &identity)
            .await
            .map_err(at(OnboardingStep::Bootstrap))?;
        info!(host, identity, mgmt_interface = mgmt_interface.as_deref().unwrap_or("-"), "bootstrapped");

        self.discovery(&conn).await;
        self.firewall(&conn).await.map_err(at(OnboardingStep::Firewall))?;

        let dhcp_server = if ros.apply_sector_config {
            let plan = SectorPlan::from_config(&ros.config, mgmt_interface.as_deref())
                .map_err(at(OnboardingStep::SectorConfig))?;
            conn = self.apply_sector(conn, ip, &identity, &plan).await?;
            Some(plan.dhcp_server)
        } else {
            non_empty(ros.config.dhcp_server.as_deref()).map(str::to_owned)
        };

        self.lease_script(&conn, dhcp_server.as_deref())
            .await
            .map_err(at(OnboardingStep::LeaseScript))?;

        if self.config.call_home.enabled {
            conn = self.call_home(conn, ip, &identity).await?;
        }
        drop(conn);

        let mut device = OnboardedDevice {
            ip,
            identity,
            api_port: ros.api_port,
            mgmt_interface,
            registration: None,
        };
        if let (Some(directory), Some(settings)) = (&self.directory, &self.config.directory) {
            if settings.register_device {
                device.registration = Some(
                    directory
                        .register_device(&self.config.sector_code, &device)
                        .await
                        .map_err(at(OnboardingStep::Register))?,
                );
            }
        }

        info!(host, identity = %device.identity, "onboarding complete");
        Ok(CandidateOutcome::Completed(device))
    }

    /// Bootstrap credential first; a device already onboarded by an
    /// earlier run only accepts the management credential.
    async fn login(&self, ip: Ipv4Addr) -> Result<DeviceConnection, CoreError> {
        match self.connector.connect(&self.bootstrap_info(ip)).await {
            Err(CoreError::AuthenticationFailed { .. }) => {
                debug!(%ip, "bootstrap login refused, trying management credentials");
                self.connector.connect(&self.mgmt_info(ip)).await
            }
            other => other,
        }
    }

    /// Identity, API service, management group and user. Returns the
    /// interface carrying the management address.
    async fn bootstrap(&self, conn: &DeviceConnection, identity: &str) -> Result<Option<String>, CoreError> {
        let ros = &self.config.routeros;
        ensure_identity(conn, identity).await?;
        ensure_api_service(conn, ros.api_port).await?;
        ensure_user_group(conn, &ros.mgmt_group, &ros.mgmt_group_policy).await?;
        ensure_user(
            conn,
            &ros.mgmt_user,
            self.secrets.mgmt_password.expose_secret(),
            &ros.mgmt_group,
        )
        .await?;
        management_interface(conn).await
    }

    async fn discovery(&self, conn: &DeviceConnection) {
        let ros = &self.config.routeros;
        if ros.discovery_interfaces.is_empty() {
            return;
        }
        if let Err(error) = restrict_discovery(conn, &ros.discovery_list, &ros.discovery_interfaces).await {
            warn!(host = %conn.host(), %error, "discovery services not restricted");
        }
    }

    /// Allow rules for each management source, then the catch-all drop.
    async fn firewall(&self, conn: &DeviceConnection) -> Result<(), CoreError> {
        let ros = &self.config.routeros;
        if ros.allowed_mgmt_ips.is_empty() {
            warn!(host = %conn.host(), "no allowed_mgmt_ips, API port left unfiltered");
            return Ok(());
        }
        for src in &ros.allowed_mgmt_ips {
            ensure_firewall_allow(conn, ros.api_port, src, ALLOW_API_COMMENT).await?;
        }
        ensure_firewall_drop(conn, ros.api_port, DROP_API_COMMENT).await?;
        Ok(())
    }

    /// Apply the sector plan; on failure reconnect with the management
    /// credential and try once more before giving up with a runbook.
    async fn apply_sector(
        &self,
        conn: DeviceConnection,
        ip: Ipv4Addr,
        identity: &str,
        plan: &SectorPlan,
    ) -> Result<DeviceConnection, OnboardingFailure> {
        let first = match plan.apply(&conn).await {
            Ok(outcomes) => {
                let changed = outcomes.iter().filter(|o| o.changed()).count();
                info!(host = %conn.host(), steps = outcomes.len(), changed, "sector configuration applied");
                return Ok(conn);
            }
            Err(failure) => failure,
        };
        warn!(
            %ip,
            step = %first.step,
            error = %first.error,
            "sector configuration failed, retrying with management credentials"
        );
        drop(conn);

        let (index, error) = match self.connector.connect(&self.mgmt_info(ip)).await {
            Ok(conn) => match plan.apply(&conn).await {
                Ok(_) => {
                    info!(%ip, "sector configuration applied on retry");
                    return Ok(conn);
                }
                Err(second) => (second.index, second.error),
            },
            Err(error) => (first.index, error),
        };

        let runbook = Runbook::new(ip.to_string(), identity, error.to_string(), plan.remaining(index));
        warn!(%ip, "sector configuration needs manual work:\n{runbook}");
        Err(OnboardingFailure {
            step: OnboardingStep::SectorConfig,
            error,
            runbook: Some(runbook),
        })
    }

    /// Bind the MAC onboarding lease script, or clear a stale one.
    async fn lease_script(&self, conn: &DeviceConnection, dhcp_server: Option<&str>) -> Result<(), CoreError> {
        let webhook = &self.config.webhook;
        if webhook.enabled {
            let server = dhcp_server
                .ok_or_else(|| CoreError::config("webhook.enabled needs routeros.config.dhcp_server"))?;
            let url = self
                .config
                .webhook_url()
                .ok_or_else(|| CoreError::config("webhook.url is not set"))?;
            let token = self
                .secrets
                .webhook_token
                .as_ref()
                .ok_or_else(|| CoreError::config("webhook token is not set"))?;
            let script = scripts::lease_script(&url, token.expose_secret(), self.config.webhook_sector());
            bind_dhcp_lease_script(conn, server, Some(&script)).await?;
            return Ok(());
        }

        let Some(server) = dhcp_server.filter(|_| webhook.clear_lease_script_on_disable) else {
            return Ok(());
        };
        match bind_dhcp_lease_script(conn, server, None).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                debug!(host = %conn.host(), server, "no dhcp server, nothing to clear");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn call_home_body(&self) -> Result<String, CoreError> {
        let ch = &self.config.call_home;
        let url = non_empty(ch.url.as_deref()).ok_or_else(|| CoreError::config("call_home.url is not set"))?;
        Ok(scripts::call_home_script(&scripts::CallHome {
            url,
            token: self.secrets.call_home_token.as_ref().map(ExposeSecret::expose_secret),
            ip_lookup_url: &ch.ip_lookup_url,
            mac_interface: non_empty(ch.mac_interface.as_deref()),
            check_certificate: ch.check_certificate,
        }))
    }

    async fn install_call_home(&self, conn: &DeviceConnection) -> Result<(), CoreError> {
        let ch = &self.config.call_home;
        let body = self.call_home_body()?;
        ensure_script(conn, &ch.script_name, &body).await?;
        ensure_scheduler(
            conn,
            &ch.scheduler_name,
            &ch.interval,
            &scripts::run_script_event(&ch.script_name),
        )
        .await?;
        run_script(conn, &ch.script_name).await
    }

    /// Install and run the check-in script, retrying once on a fresh
    /// management session.
    async fn call_home(
        &self,
        conn: DeviceConnection,
        ip: Ipv4Addr,
        identity: &str,
    ) -> Result<DeviceConnection, OnboardingFailure> {
        let first = match self.install_call_home(&conn).await {
            Ok(()) => {
                info!(host = %conn.host(), script = %self.config.call_home.script_name, "call-home installed");
                return Ok(conn);
            }
            Err(error) => error,
        };
        if first.is_config() {
            return Err(OnboardingFailure::at(OnboardingStep::CallHome, first));
        }
        warn!(%ip, error = %first, "call-home install failed, retrying");
        drop(conn);

        let error = match self.connector.connect(&self.mgmt_info(ip)).await {
            Ok(conn) => match self.install_call_home(&conn).await {
                Ok(()) => return Ok(conn),
                Err(error) => error,
            },
            Err(error) => error,
        };

        let ch = &self.config.call_home;
        let commands = match self.call_home_body() {
            Ok(body) => vec![
                Command::add("/system/script")
                    .arg("name", &ch.script_name)
                    .arg("source", body),
                Command::add("/system/scheduler")
                    .arg("name", &ch.scheduler_name)
                    .arg("interval", &ch.interval)
                    .arg("on-event", scripts::run_script_event(&ch.script_name))
                    .arg("start-time", "startup"),
                Command::new("/system/script/run").arg("number", &ch.script_name),
            ],
            Err(_) => Vec::new(),
        };
        let runbook = Runbook::manual(
            ip.to_string(),
            identity,
            error.to_string(),
            vec![
                format!("script {}", ch.script_name),
                format!("scheduler {} every {}", ch.scheduler_name, ch.interval),
                format!("run {} once", ch.script_name),
            ],
            &commands,
        );
        warn!(%ip, "call-home needs manual work:\n{runbook}");
        Err(OnboardingFailure {
            step: OnboardingStep::CallHome,
            error,
            runbook: Some(runbook),
        })
    }
}

/// Interface carrying the address the session connected to.
async fn management_interface(conn: &DeviceConnection) -> Result<Option<String>, CoreError> {
    let prefix = format!("{}/", conn.host());
    let rows = conn.print("/ip/address", &[]).await?;
    Ok(rows
        .iter()
        .find(|row| row.get("address").is_some_and(|a| a.starts_with(&prefix)))
        .and_then(|row| row.get("interface"))
        .map(str::to_owned))
}

async fn has_mac(conn: &DeviceConnection, target: &MacAddress) -> Result<bool, CoreError> {
    let interfaces = conn.print("/interface", &[]).await?;
    Ok(interfaces.iter().any(|row| {
        row.get("mac-address")
            .is_some_and(|mac| MacAddress::new(mac) == *target)
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use super::*;
    use crate::connector::SimulatedFleet;
    use edgeprov_api::SimulatedDevice;

    fn profile() -> Value {
        json!({
            "mgmt_subnet": "10.0.0.0/30",
            "sector_code": "NORTE",
            "routeros": {
                "mgmt_pass_value": "n0c-pass",
                "allowed_mgmt_ips": ["10.0.0.5"],
                "discovery_interfaces": "ether2",
                "config": {
                    "wan_interface": "ether5",
                    "lan_bridge": "bridge-lan",
                    "lan_ports": "ether1,ether2,ether3",
                    "lan_address": "10.20.0.1/24",
                    "dhcp_pool": "pool-lan",
                    "dhcp_range": "10.20.0.10-10.20.0.250",
                    "dhcp_server": "dhcp-lan",
                    "dhcp_network": "10.20.0.0/24"
                }
            },
            "webhook": {
                "enabled": true,
                "url": "https://odoo.isp.example/isp/mac_onboarding",
                "token_value": "hook-token"
            },
            "call_home": {
                "enabled": true,
                "url": "https://noc.isp.example/checkin"
            },
            "odoo": {"url": "https://odoo.isp.example", "db": "isp", "user": "bot", "pass_value": "x"}
        })
    }

    fn orchestrator(fleet: Arc<SimulatedFleet>, value: Value) -> (Orchestrator, Arc<MemoryDirectory>) {
        let config = OnboardingConfig::from_value(value).unwrap();
        let secrets = config.resolve_secrets(&|_| None).unwrap();
        let directory = Arc::new(MemoryDirectory::new());
        let orchestrator = Orchestrator::new(config, secrets, fleet)
            .unwrap()
            .with_directory(directory.clone());
        (orchestrator, directory)
    }

    #[tokio::test]
    async fn scan_isolates_a_refusing_candidate() {
        let fleet = Arc::new(SimulatedFleet::new());
        fleet.add_refusing("10.0.0.1");
        let device = fleet.add(SimulatedDevice::new("10.0.0.2"));
        let (orchestrator, directory) = orchestrator(fleet, profile());

        let report = orchestrator.run_scan().await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(report.failed[0].step, OnboardingStep::Connect);
        assert_eq!(report.completed.len(), 1);

        let done = &report.completed[0];
        assert_eq!(done.identity, "MT-NORTE-2");
        assert_eq!(done.mgmt_interface.as_deref(), Some("ether1"));
        assert!(done.registration.is_some());
        assert_eq!(directory.devices().len(), 1);

        assert_eq!(
            device.singleton("/system/identity").unwrap().get("name"),
            Some("MT-NORTE-2")
        );
        let ports: Vec<String> = device
            .records("/interface/bridge/port")
            .iter()
            .filter_map(|r| r.get("interface").map(str::to_owned))
            .collect();
        assert_eq!(ports, vec!["ether2", "ether3"]);

        let rules: Vec<String> = device
            .records("/ip/firewall/filter")
            .iter()
            .filter_map(|r| r.get("comment").map(str::to_owned))
            .collect();
        assert_eq!(rules, vec![ALLOW_API_COMMENT, DROP_API_COMMENT]);

        let server = &device.records("/ip/dhcp-server")[0];
        assert!(server.get("lease-script").unwrap().contains("token=hook-token"));
        let script = &device.records("/system/script")[0];
        assert_eq!(script.get("run-count"), Some("1"));
        assert_eq!(device.records("/system/scheduler")[0].get("interval"), Some("5m"));
        device.authenticate("odoo_noc", "n0c-pass").unwrap();
    }

    #[tokio::test]
    async fn second_run_sends_only_the_password_and_script_run() {
        let fleet = Arc::new(SimulatedFleet::new());
        let device = fleet.add(SimulatedDevice::new("10.0.0.2"));
        let (orchestrator, _) = orchestrator(fleet, profile());

        orchestrator.onboard(Ipv4Addr::new(10, 0, 0, 2)).await.unwrap();
        device.clear_log();
        orchestrator.onboard(Ipv4Addr::new(10, 0, 0, 2)).await.unwrap();

        let paths: Vec<String> = device.mutations().iter().map(|c| c.path().to_owned()).collect();
        assert_eq!(paths, vec!["/user/set", "/system/script/run"]);
    }

    #[tokio::test]
    async fn sector_failure_retries_once_then_emits_runbook() {
        let fleet = Arc::new(SimulatedFleet::new());
        let device = fleet.add(SimulatedDevice::new("10.0.0.2"));
        let (orchestrator, directory) = orchestrator(fleet, profile());
        device.fail_next("/ip/pool/add", 2, "failure: not enough memory");

        let failure = match orchestrator.onboard(Ipv4Addr::new(10, 0, 0, 2)).await {
            Err(failure) => failure,
            Ok(outcome) => panic!("expected failure, got {outcome:?}"),
        };
        assert_eq!(failure.step, OnboardingStep::SectorConfig);
        let runbook = failure.runbook.unwrap();
        assert!(runbook.steps[0].starts_with("pool pool-lan"));
        assert!(runbook.commands.iter().any(|c| c.starts_with("/ip dhcp-server add name=dhcp-lan")));
        assert!(directory.devices().is_empty());

        let adds = device
            .commands()
            .iter()
            .filter(|c| c.path() == "/ip/pool/add")
            .count();
        assert_eq!(adds, 2);
    }

    #[tokio::test]
    async fn sector_retry_recovers() {
        let fleet = Arc::new(SimulatedFleet::new());
        let device = fleet.add(SimulatedDevice::new("10.0.0.2"));
        let (orchestrator, _) = orchestrator(fleet, profile());
        device.fail_next("/ip/pool/add", 1, "failure: not enough memory");

        let outcome = orchestrator.onboard(Ipv4Addr::new(10, 0, 0, 2)).await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::Completed(_)));
        assert_eq!(device.records("/ip/pool").len(), 1);
    }

    #[tokio::test]
    async fn already_onboarded_device_accepts_management_login() {
        let fleet = Arc::new(SimulatedFleet::new());
        fleet.add(
            SimulatedDevice::new("10.0.0.2")
                .with_admin_password("changed")
                .with_record("/user", [("name", "odoo_noc"), ("group", "full"), ("password", "n0c-pass")]),
        );
        let (orchestrator, _) = orchestrator(fleet, profile());
        let outcome = orchestrator.onboard(Ipv4Addr::new(10, 0, 0, 2)).await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn target_mac_mismatch_is_a_skip() {
        let fleet = Arc::new(SimulatedFleet::new());
        let device = fleet.add(SimulatedDevice::new("10.0.0.2"));
        let mut value = profile();
        value["target_mac"] = json!("de:ad:be:ef:00:01");
        let (orchestrator, _) = orchestrator(fleet, value);

        let outcome = orchestrator.onboard(Ipv4Addr::new(10, 0, 0, 2)).await.unwrap();
        assert!(matches!(outcome, CandidateOutcome::Skipped(_)));
        assert!(device.mutations().is_empty());
    }

    #[tokio::test]
    async fn disabled_webhook_clears_the_lease_script() {
        let fleet = Arc::new(SimulatedFleet::new());
        let device = fleet.add(SimulatedDevice::new("10.0.0.2").with_record(
            "/ip/dhcp-server",
            [("name", "dhcp-lan"), ("lease-script", "/tool fetch url=old")],
        ));
        let mut value = profile();
        value["webhook"]["enabled"] = json!(false);
        value["call_home"]["enabled"] = json!(false);
        let (orchestrator, _) = orchestrator(fleet, value);

        orchestrator.onboard(Ipv4Addr::new(10, 0, 0, 2)).await.unwrap();
        assert_eq!(device.records("/ip/dhcp-server")[0].get("lease-script"), Some(""));
        assert!(device.records("/system/script").is_empty());
    }

    #[tokio::test]
    async fn remote_profile_overrides_local_non_null_keys() {
        let mut local = profile();
        local["odoo"]["fetch_preconfig"] = json!(true);
        let directory = MemoryDirectory::new().with_preconfig(
            "NORTE",
            json!({
                "mgmt_subnet": null,
                "naming": {"identity_prefix": "RB-", "identity_format": null},
                "routeros": {"config": {"dhcp_lease_time": "30m", "hotspot_dns_name": false}}
            }),
        );

        let cfg = load_profile(&local, Some(&directory as &dyn Directory)).await.unwrap();
        assert_eq!(cfg.mgmt_subnet, "10.0.0.0/30");
        assert_eq!(cfg.naming.identity_prefix, "RB-");
        assert_eq!(cfg.naming.identity_format, "{prefix}{sector}-{ip_last_octet}");
        assert_eq!(cfg.routeros.config.dhcp_lease_time, "30m");
        assert_eq!(cfg.routeros.config.wan_interface.as_deref(), Some("ether5"));

        local["odoo"]["fetch_preconfig"] = json!(false);
        let untouched = load_profile(&local, Some(&directory as &dyn Directory)).await.unwrap();
        assert_eq!(untouched.naming.identity_prefix, "MT-");
    }

    #[tokio::test]
    async fn remote_profile_supplies_sections_missing_locally() {
        let mut local = profile();
        local["odoo"]["fetch_preconfig"] = json!(true);
        local.as_object_mut().unwrap().remove("call_home");
        let directory = MemoryDirectory::new().with_default_preconfig(json!({
            "call_home": {
                "enabled": true,
                "url": "https://noc.isp.example/checkin",
                "interval": null,
                "mac_interface": null,
                "script_name": "noc_checkin"
            }
        }));

        let cfg = load_profile(&local, Some(&directory as &dyn Directory)).await.unwrap();
        assert!(cfg.call_home.enabled);
        assert_eq!(cfg.call_home.url.as_deref(), Some("https://noc.isp.example/checkin"));
        assert_eq!(cfg.call_home.interval, "5m");
        assert_eq!(cfg.call_home.mac_interface, None);
        assert_eq!(cfg.call_home.script_name, "noc_checkin");
        assert_eq!(cfg.mgmt_subnet, "10.0.0.0/30");
    }

    #[test]
    fn orchestrator_rejects_invalid_profile() {
        let config = OnboardingConfig::from_value(json!({"sector_code": "NORTE"})).unwrap();
        let secrets = OnboardingSecrets {
            bootstrap_password: SecretString::from(""),
            mgmt_password: SecretString::from("x"),
            webhook_token: None,
            call_home_token: None,
            directory_password: None,
        };
        let err = Orchestrator::new(config, secrets, Arc::new(SimulatedFleet::new())).unwrap_err();
        assert!(err.is_config());
    }
}
