// Device connection abstraction
//
// `DeviceConnection` is the single surface the reconciliation engine and
// job handlers talk to. Live sessions, dry-run logging, and the in-memory
// simulator all sit behind it.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tracing::trace;

use crate::client::RouterOsClient;
use crate::command::{Command, Record, Response};
use crate::dry_run::DryRunDevice;
use crate::error::Error;
use crate::sim::SimulatedDevice;

/// Default RouterOS API port (plain TCP).
pub const DEFAULT_API_PORT: u16 = 8728;

/// Where and how to log in to a device.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl ConnectionInfo {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password,
        }
    }
}

/// An open session to one device.
#[derive(Debug)]
pub enum DeviceConnection {
    Live(RouterOsClient),
    DryRun(DryRunDevice),
    Simulated(Arc<SimulatedDevice>),
}

impl DeviceConnection {
    /// Open a live session.
    pub async fn connect(info: &ConnectionInfo, timeout: Duration) -> Result<Self, Error> {
        RouterOsClient::connect(info, timeout).await.map(Self::Live)
    }

    /// Log in to a simulated device with the given credentials.
    pub fn simulated(device: Arc<SimulatedDevice>, info: &ConnectionInfo) -> Result<Self, Error> {
        use secrecy::ExposeSecret;
        device.authenticate(&info.username, info.password.expose_secret())?;
        Ok(Self::Simulated(device))
    }

    pub fn dry_run(host: impl Into<String>) -> Self {
        Self::DryRun(DryRunDevice::new(host))
    }

    pub fn host(&self) -> &str {
        match self {
            Self::Live(client) => client.host(),
            Self::DryRun(dev) => dev.host(),
            Self::Simulated(dev) => dev.host(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun(_))
    }

    /// Send one command.
    pub async fn run(&self, cmd: &Command) -> Result<Response, Error> {
        trace!(host = %self.host(), path = cmd.path(), "run");
        match self {
            Self::Live(client) => client.run(cmd).await,
            Self::DryRun(dev) => Ok(dev.execute(cmd)),
            Self::Simulated(dev) => dev.execute(cmd),
        }
    }

    // ── Convenience wrappers ────────────────────────────────────────

    /// `print` with ANDed `field=value` queries.
    pub async fn print(&self, menu: &str, queries: &[(&str, &str)]) -> Result<Vec<Record>, Error> {
        let cmd = queries
            .iter()
            .fold(Command::print(menu), |cmd, (k, v)| cmd.query(*k, *v));
        Ok(self.run(&cmd).await?.records)
    }

    /// First row matching `field=value`.
    pub async fn find(&self, menu: &str, field: &str, value: &str) -> Result<Option<Record>, Error> {
        Ok(self.print(menu, &[(field, value)]).await?.into_iter().next())
    }

    /// `add` and return the new `.id` when the device reports one.
    pub async fn add(&self, menu: &str, fields: &[(&str, &str)]) -> Result<Option<String>, Error> {
        let cmd = Command::add(menu).args(fields.iter().copied());
        Ok(self.run(&cmd).await?.ret)
    }

    /// `set` on the item with `.id` (or name) `id`.
    pub async fn set(&self, menu: &str, id: &str, fields: &[(&str, &str)]) -> Result<(), Error> {
        let cmd = Command::set(menu)
            .arg("numbers", id)
            .args(fields.iter().copied());
        self.run(&cmd).await.map(drop)
    }

    /// `set` on a singleton settings menu.
    pub async fn set_settings(&self, menu: &str, fields: &[(&str, &str)]) -> Result<(), Error> {
        let cmd = Command::set(menu).args(fields.iter().copied());
        self.run(&cmd).await.map(drop)
    }

    pub async fn remove(&self, menu: &str, id: &str) -> Result<(), Error> {
        let cmd = Command::remove(menu).arg("numbers", id);
        self.run(&cmd).await.map(drop)
    }

    /// Move `id` in front of `destination`.
    pub async fn move_before(&self, menu: &str, id: &str, destination: &str) -> Result<(), Error> {
        let cmd = Command::new(format!("{menu}/move"))
            .arg("numbers", id)
            .arg("destination", destination);
        self.run(&cmd).await.map(drop)
    }
}
