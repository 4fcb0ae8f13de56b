// ── Back-office directory ──
//
// Onboarding reads the sector's remote profile from the directory and
// writes the device back once it is configured. `OdooDirectory` speaks the
// back office's JSON-RPC models; `MemoryDirectory` stands in for tests and
// offline runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use edgeprov_api::DirectoryClient;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::report::{OnboardedDevice, Registration};
use crate::error::CoreError;

const SECTOR_MODEL: &str = "isp.sector";
const DEVICE_MODEL: &str = "isp.device";
const ROUTER_MODEL: &str = "isp.mikrotik.router";
const PRECONFIG_MODEL: &str = "isp.mikrotik.preconfig";

/// Remote authority for sector profiles and device records.
pub trait Directory: Send + Sync {
    /// Sector profile as an untyped document; `{}` when none is defined.
    fn fetch_preconfig<'a>(&'a self, sector: &'a str) -> BoxFuture<'a, Result<Value, CoreError>>;

    /// Upsert the device (keyed by management IP) and its router record.
    fn register_device<'a>(
        &'a self,
        sector: &'a str,
        device: &'a OnboardedDevice,
    ) -> BoxFuture<'a, Result<Registration, CoreError>>;
}

// ── JSON-RPC directory ──────────────────────────────────────────────

#[derive(Debug)]
pub struct OdooDirectory {
    client: DirectoryClient,
}

impl OdooDirectory {
    pub fn new(client: DirectoryClient) -> Self {
        Self { client }
    }

    async fn first_id(&self, model: &str, domain: Value) -> Result<Option<i64>, CoreError> {
        Ok(self.client.search(model, domain, Some(1)).await?.into_iter().next())
    }

    async fn register(&self, sector: &str, device: &OnboardedDevice) -> Result<Registration, CoreError> {
        let sector_id = self
            .first_id(SECTOR_MODEL, json!([["code", "=", sector]]))
            .await?
            .ok_or_else(|| CoreError::Directory {
                message: format!("sector not found: {sector}"),
            })?;

        let ip = device.ip.to_string();
        let values = json!({
            "name": device.identity,
            "sector_id": sector_id,
            "mgmt_port": device.api_port,
            "status": "active",
        });
        let device_id = match self
            .first_id(
                DEVICE_MODEL,
                json!([["mgmt_ip", "=", ip], ["device_type", "=", "mikrotik"]]),
            )
            .await?
        {
            Some(id) => {
                self.client.write(DEVICE_MODEL, &[id], values).await?;
                debug!(device_id = id, ip, "directory device updated");
                id
            }
            None => {
                let mut values = values;
                values["device_type"] = json!("mikrotik");
                values["mgmt_ip"] = json!(ip);
                let id = self.client.create(DEVICE_MODEL, values).await?;
                debug!(device_id = id, ip, "directory device created");
                id
            }
        };

        let router_id = match self
            .first_id(ROUTER_MODEL, json!([["device_id", "=", device_id]]))
            .await?
        {
            Some(id) => id,
            None => {
                self.client
                    .create(ROUTER_MODEL, json!({"device_id": device_id, "auth_method": "api"}))
                    .await?
            }
        };

        info!(ip, identity = %device.identity, device_id, router_id, "device registered");
        Ok(Registration { device_id, router_id })
    }
}

impl Directory for OdooDirectory {
    fn fetch_preconfig<'a>(&'a self, sector: &'a str) -> BoxFuture<'a, Result<Value, CoreError>> {
        async move {
            let value = self
                .client
                .execute_kw(PRECONFIG_MODEL, "get_preconfig_for_sector", json!([sector]), json!({}))
                .await?;
            match value {
                Value::Object(_) => Ok(value),
                Value::Null | Value::Bool(false) => Ok(json!({})),
                other => Err(CoreError::Directory {
                    message: format!("preconfig for {sector} is not an object: {other}"),
                }),
            }
        }
        .boxed()
    }

    fn register_device<'a>(
        &'a self,
        sector: &'a str,
        device: &'a OnboardedDevice,
    ) -> BoxFuture<'a, Result<Registration, CoreError>> {
        self.register(sector, device).boxed()
    }
}

// ── In-memory directory ─────────────────────────────────────────────

/// Directory held in memory. Profiles are looked up by sector, then the
/// `None` default; registrations are upserted by management IP.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    preconfig: BTreeMap<Option<String>, Value>,
    devices: Mutex<Vec<(String, OnboardedDevice, Registration)>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preconfig(mut self, sector: &str, profile: Value) -> Self {
        self.preconfig.insert(Some(sector.to_owned()), profile);
        self
    }

    pub fn with_default_preconfig(mut self, profile: Value) -> Self {
        self.preconfig.insert(None, profile);
        self
    }

    /// Registered devices with their sector.
    pub fn devices(&self) -> Vec<(String, OnboardedDevice)> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(sector, device, _)| (sector.clone(), device.clone()))
            .collect()
    }
}

impl Directory for MemoryDirectory {
    fn fetch_preconfig<'a>(&'a self, sector: &'a str) -> BoxFuture<'a, Result<Value, CoreError>> {
        let profile = self
            .preconfig
            .get(&Some(sector.to_owned()))
            .or_else(|| self.preconfig.get(&None))
            .cloned()
            .unwrap_or_else(|| json!({}));
        futures_util::future::ready(Ok(profile)).boxed()
    }

    fn register_device<'a>(
        &'a self,
        sector: &'a str,
        device: &'a OnboardedDevice,
    ) -> BoxFuture<'a, Result<Registration, CoreError>> {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let registration = if let Some(entry) = devices.iter_mut().find(|(_, d, _)| d.ip == device.ip) {
            entry.0 = sector.to_owned();
            entry.1 = device.clone();
            entry.2
        } else {
            let next = i64::try_from(devices.len()).unwrap_or(i64::MAX - 1) + 1;
            let registration = Registration {
                device_id: next,
                router_id: next,
            };
            devices.push((sector.to_owned(), device.clone(), registration));
            registration
        };
        futures_util::future::ready(Ok(registration)).boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn device(identity: &str) -> OnboardedDevice {
        OnboardedDevice {
            ip: Ipv4Addr::new(10, 0, 0, 2),
            identity: identity.into(),
            api_port: 8728,
            mgmt_interface: Some("ether1".into()),
            registration: None,
        }
    }

    #[tokio::test]
    async fn memory_preconfig_falls_back_to_default() {
        let dir = MemoryDirectory::new()
            .with_preconfig("NORTE", json!({"sector_code": "NORTE"}))
            .with_default_preconfig(json!({"naming": {"identity_prefix": "RB-"}}));
        assert_eq!(dir.fetch_preconfig("NORTE").await.unwrap()["sector_code"], "NORTE");
        assert_eq!(
            dir.fetch_preconfig("SUR").await.unwrap()["naming"]["identity_prefix"],
            "RB-"
        );
        assert_eq!(MemoryDirectory::new().fetch_preconfig("SUR").await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn memory_registration_upserts_by_ip() {
        let dir = MemoryDirectory::new();
        let first = dir.register_device("NORTE", &device("MT-NORTE-2")).await.unwrap();
        let second = dir.register_device("NORTE", &device("MT-NORTE-2b")).await.unwrap();
        assert_eq!(first, second);
        let devices = dir.devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].1.identity, "MT-NORTE-2b");
    }
}
