// ── Job payload shapes ──
//
// Payloads are stored as opaque JSON objects on the job; each handler
// parses the shape it needs when it runs.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

fn default_profile() -> String {
    "default".into()
}

/// Parse a job payload into a typed shape.
pub fn parse_payload<T: DeserializeOwned>(
    what: &str,
    payload: &Map<String, Value>,
) -> Result<T, CoreError> {
    serde_json::from_value(Value::Object(payload.clone()))
        .map_err(|e| CoreError::validation(format!("invalid {what} payload: {e}")))
}

// ── Subscriber lifecycle ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Pppoe,
    Dhcp,
}

/// Subscription facts a lifecycle handler needs on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionPayload {
    /// Subscription reference; names the queue and tags the lease.
    pub name: String,
    #[serde(default)]
    pub service_type: Option<ServiceType>,
    #[serde(default)]
    pub pppoe_username: Option<String>,
    #[serde(default)]
    pub pppoe_password: Option<String>,
    #[serde(default = "default_profile")]
    pub ppp_profile: String,
    #[serde(default)]
    pub service_ip: Option<String>,
    #[serde(default)]
    pub service_mac: Option<String>,
    #[serde(default)]
    pub download_mbps: u32,
    #[serde(default)]
    pub upload_mbps: u32,
}

impl SubscriptionPayload {
    /// Simple-queue `max-limit`, e.g. `"50M/10M"`.
    pub fn max_limit(&self) -> String {
        format!("{}M/{}M", self.download_mbps, self.upload_mbps)
    }

    /// The PPPoE username, required for PPP operations.
    pub fn require_pppoe_username(&self) -> Result<&str, CoreError> {
        non_empty(self.pppoe_username.as_deref()).ok_or_else(|| {
            CoreError::validation(format!("subscription {} has no pppoe_username", self.name))
        })
    }

    pub fn service_ip(&self) -> Option<&str> {
        non_empty(self.service_ip.as_deref())
    }

    pub fn service_mac(&self) -> Option<&str> {
        non_empty(self.service_mac.as_deref())
    }
}

// ── Captive portal ──────────────────────────────────────────────────

/// Hotspot user to create or disable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptivePayload {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Sector code, stored as the hotspot user comment.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Walled-garden host to allow before login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalledGardenPayload {
    pub domain: String,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Treat `Some("")` like `None`.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
