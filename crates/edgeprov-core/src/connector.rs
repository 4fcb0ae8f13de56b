// ── Device connectors and target resolution ──
//
// Handlers and the onboarding orchestrator never open sockets directly;
// they go through a `DeviceConnector` so the same code runs against real
// devices, dry-run logging, or an in-memory fleet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use edgeprov_api::{ConnectionInfo, DeviceConnection, SimulatedDevice};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::error::CoreError;
use crate::model::JobTarget;

/// Opens device sessions.
pub trait DeviceConnector: Send + Sync {
    /// Cheap reachability check on the API port.
    fn probe<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<(), CoreError>>;

    /// Open an authenticated session.
    fn connect<'a>(&'a self, info: &'a ConnectionInfo) -> BoxFuture<'a, Result<DeviceConnection, CoreError>>;
}

// ── TCP ─────────────────────────────────────────────────────────────

/// Connector for real devices over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Connect timeout for discovery probes.
    pub probe_timeout: Duration,
    /// Connect and reply timeout for sessions.
    pub io_timeout: Duration,
    /// Log commands instead of opening sessions.
    pub dry_run: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(500),
            io_timeout: Duration::from_secs(10),
            dry_run: false,
        }
    }
}

impl DeviceConnector for TcpConnector {
    fn probe<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            edgeprov_api::probe(host, port, self.probe_timeout)
                .await
                .map_err(CoreError::from)
        }
        .boxed()
    }

    fn connect<'a>(&'a self, info: &'a ConnectionInfo) -> BoxFuture<'a, Result<DeviceConnection, CoreError>> {
        async move {
            if self.dry_run {
                debug!(host = %info.host, "dry-run connection");
                return Ok(DeviceConnection::dry_run(&info.host));
            }
            DeviceConnection::connect(info, self.io_timeout)
                .await
                .map_err(CoreError::from)
        }
        .boxed()
    }
}

// ── Simulated fleet ─────────────────────────────────────────────────

/// In-memory devices keyed by host. Unknown hosts refuse connections.
#[derive(Debug, Default)]
pub struct SimulatedFleet {
    devices: DashMap<String, Arc<SimulatedDevice>>,
    /// Hosts whose port answers probes but drops every session.
    refusing: DashSet<String>,
}

impl SimulatedFleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device and return a handle for assertions.
    pub fn add(&self, device: SimulatedDevice) -> Arc<SimulatedDevice> {
        let device = Arc::new(device);
        self.devices
            .insert(device.host().to_owned(), Arc::clone(&device));
        device
    }

    /// A host that looks like a candidate to a probe but refuses the
    /// API session.
    pub fn add_refusing(&self, host: impl Into<String>) {
        self.refusing.insert(host.into());
    }

    pub fn get(&self, host: &str) -> Option<Arc<SimulatedDevice>> {
        self.devices.get(host).map(|d| Arc::clone(d.value()))
    }

    fn refused(host: &str) -> CoreError {
        CoreError::ConnectionFailed {
            host: host.to_owned(),
            reason: "connection refused".into(),
        }
    }
}

impl DeviceConnector for SimulatedFleet {
    fn probe<'a>(&'a self, host: &'a str, _port: u16) -> BoxFuture<'a, Result<(), CoreError>> {
        let result = if self.devices.contains_key(host) || self.refusing.contains(host) {
            Ok(())
        } else {
            Err(Self::refused(host))
        };
        futures_util::future::ready(result).boxed()
    }

    fn connect<'a>(&'a self, info: &'a ConnectionInfo) -> BoxFuture<'a, Result<DeviceConnection, CoreError>> {
        let result = match self.get(&info.host) {
            _ if self.refusing.contains(info.host.as_str()) => Err(Self::refused(&info.host)),
            Some(device) => DeviceConnection::simulated(device, info).map_err(CoreError::from),
            None => Err(Self::refused(&info.host)),
        };
        futures_util::future::ready(result).boxed()
    }
}

// ── Target resolution ───────────────────────────────────────────────

/// A device known to the dispatcher.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub info: ConnectionInfo,
    pub sector: Option<String>,
}

/// Name-indexed device table used to resolve job targets.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceDirectory {
    devices: BTreeMap<String, DeviceEntry>,
}

impl StaticDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: DeviceEntry) {
        self.devices.insert(name.into(), entry);
    }

    pub fn with_device(mut self, name: impl Into<String>, entry: DeviceEntry) -> Self {
        self.insert(name, entry);
        self
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceEntry)> {
        self.devices.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Device key wins; otherwise the first device serving the sector.
    pub fn resolve(&self, target: &JobTarget) -> Result<&ConnectionInfo, CoreError> {
        if let Some(name) = &target.device {
            return self
                .devices
                .get(name)
                .map(|entry| &entry.info)
                .ok_or_else(|| CoreError::config(format!("unknown device '{name}'")));
        }
        if let Some(sector) = &target.sector {
            return self
                .devices
                .values()
                .find(|entry| entry.sector.as_deref() == Some(sector.as_str()))
                .map(|entry| &entry.info)
                .ok_or_else(|| CoreError::config(format!("no device serves sector '{sector}'")));
        }
        Err(CoreError::config(format!(
            "job target ({target}) names neither a device nor a sector"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn entry(host: &str, sector: Option<&str>) -> DeviceEntry {
        DeviceEntry {
            info: ConnectionInfo::new(host, 8728, "noc", SecretString::from("pw")),
            sector: sector.map(str::to_owned),
        }
    }

    #[test]
    fn device_key_takes_precedence() {
        let dir = StaticDeviceDirectory::new()
            .with_device("r1", entry("10.0.0.1", Some("NORTE")))
            .with_device("r2", entry("10.0.0.2", Some("SUR")));

        let target = JobTarget::device("r2");
        let mut with_sector = target.clone();
        with_sector.sector = Some("NORTE".into());
        assert_eq!(dir.resolve(&with_sector).unwrap().host, "10.0.0.2");
        assert_eq!(dir.resolve(&JobTarget::sector("NORTE")).unwrap().host, "10.0.0.1");
    }

    #[test]
    fn unresolvable_targets_are_config_errors() {
        let dir = StaticDeviceDirectory::new().with_device("r1", entry("10.0.0.1", None));
        assert!(dir.resolve(&JobTarget::device("nope")).unwrap_err().is_config());
        assert!(dir.resolve(&JobTarget::sector("NORTE")).unwrap_err().is_config());
        assert!(dir.resolve(&JobTarget::default()).unwrap_err().is_config());
    }

    #[tokio::test]
    async fn fleet_refuses_unknown_hosts() {
        let fleet = SimulatedFleet::new();
        fleet.add(SimulatedDevice::new("10.0.0.2"));
        fleet.probe("10.0.0.2", 8728).await.unwrap();
        let err = fleet.probe("10.0.0.1", 8728).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn refusing_host_probes_but_never_connects() {
        let fleet = SimulatedFleet::new();
        fleet.add_refusing("10.0.0.1");
        fleet.probe("10.0.0.1", 8728).await.unwrap();
        let info = ConnectionInfo::new("10.0.0.1", 8728, "admin", SecretString::from(""));
        assert!(fleet.connect(&info).await.unwrap_err().is_connection());
    }
}
