// ── Onboarding profile ──
//
// The onboarding document is merged as untyped JSON (local file, then the
// remote sector profile on top) and only then deserialized here. Core
// never reads files or the environment itself: callers hand in the merged
// value and a secret lookup.

use std::fmt;
use std::net::Ipv4Addr;

use secrecy::SecretString;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::model::non_empty;
use crate::reconcile::parse_list;

/// Policy for the management group: everything not needed for API access
/// is denied explicitly.
pub const DEFAULT_MGMT_POLICY: &str =
    "read,write,api,!local,!telnet,!ssh,!ftp,!reboot,!policy,!password,!sniff,!sensitive";

/// Complete onboarding profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingConfig {
    /// CIDR scanned for candidate devices.
    pub mgmt_subnet: String,
    /// Only onboard devices with an interface carrying this MAC.
    pub target_mac: Option<String>,
    pub bootstrap: BootstrapConfig,
    pub routeros: RouterOsConfig,
    pub call_home: CallHomeConfig,
    pub webhook: WebhookConfig,
    pub naming: NamingConfig,
    pub sector_code: String,
    #[serde(rename = "odoo")]
    pub directory: Option<DirectoryConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub user: String,
    pub pass: Option<String>,
    pub pass_env: Option<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            user: "admin".into(),
            pass: None,
            pass_env: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterOsConfig {
    pub api_port: u16,
    pub mgmt_user: String,
    pub mgmt_pass_env: Option<String>,
    pub mgmt_pass_value: Option<String>,
    pub mgmt_group: String,
    pub mgmt_group_policy: String,
    /// Interfaces allowed to run neighbor discovery and MAC access.
    #[serde(deserialize_with = "string_or_list")]
    pub discovery_interfaces: Vec<String>,
    /// Interface-list name grouping `discovery_interfaces`.
    pub discovery_list: String,
    #[serde(deserialize_with = "string_or_list")]
    pub allowed_mgmt_ips: Vec<String>,
    pub apply_sector_config: bool,
    pub config: SectorConfig,
}

impl Default for RouterOsConfig {
    fn default() -> Self {
        Self {
            api_port: edgeprov_api::DEFAULT_API_PORT,
            mgmt_user: "odoo_noc".into(),
            mgmt_pass_env: Some("MIKROTIK_MGMT_PASS".into()),
            mgmt_pass_value: None,
            mgmt_group: "odoo_noc_group".into(),
            mgmt_group_policy: DEFAULT_MGMT_POLICY.into(),
            discovery_interfaces: Vec::new(),
            discovery_list: "ISP-DISCOVERY".into(),
            allowed_mgmt_ips: Vec::new(),
            apply_sector_config: true,
            config: SectorConfig::default(),
        }
    }
}

/// Desired LAN/WAN layout for a sector. Required names stay optional here
/// and are checked when the plan is built.
///
/// The directory reports unset text fields as `false`; those read as unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectorConfig {
    #[serde(deserialize_with = "optional_text")]
    pub wan_interface: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub lan_bridge: Option<String>,
    #[serde(deserialize_with = "string_or_list")]
    pub lan_ports: Vec<String>,
    #[serde(deserialize_with = "optional_text")]
    pub lan_address: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub dhcp_pool: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub dhcp_range: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub dhcp_server: Option<String>,
    pub dhcp_lease_time: String,
    #[serde(deserialize_with = "optional_text")]
    pub dhcp_network: Option<String>,
    #[serde(deserialize_with = "optional_text")]
    pub dns_server: Option<String>,
    pub enable_dhcp_client_wan: bool,
    pub enable_nat: bool,
    pub enable_hotspot: bool,
    pub hotspot_profile: String,
    pub hotspot_server: String,
    #[serde(deserialize_with = "optional_text")]
    pub hotspot_dns_name: Option<String>,
    pub hotspot_login_by: String,
    pub hotspot_html_dir: String,
    #[serde(deserialize_with = "optional_text")]
    pub hotspot_walled_garden: Option<String>,
}

impl Default for SectorConfig {
    fn default() -> Self {
        Self {
            wan_interface: None,
            lan_bridge: None,
            lan_ports: Vec::new(),
            lan_address: None,
            dhcp_pool: None,
            dhcp_range: None,
            dhcp_server: None,
            dhcp_lease_time: "1h".into(),
            dhcp_network: None,
            dns_server: None,
            enable_dhcp_client_wan: true,
            enable_nat: true,
            enable_hotspot: false,
            hotspot_profile: "hs-prof".into(),
            hotspot_server: "hs1".into(),
            hotspot_dns_name: None,
            hotspot_login_by: "http-chap".into(),
            hotspot_html_dir: "hotspot".into(),
            hotspot_walled_garden: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallHomeConfig {
    pub enabled: bool,
    pub url: Option<String>,
    pub token_value: Option<String>,
    pub token_env: Option<String>,
    pub interval: String,
    /// Public-IP lookup service; the cloud-reported address is the fallback.
    pub ip_lookup_url: String,
    pub script_name: String,
    pub scheduler_name: String,
    pub check_certificate: bool,
    /// Interface whose MAC identifies the device; first ethernet if unset.
    pub mac_interface: Option<String>,
}

impl Default for CallHomeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            token_value: None,
            token_env: None,
            interval: "5m".into(),
            ip_lookup_url: "http://api.ipify.org".into(),
            script_name: "isp_checkin".into(),
            scheduler_name: "isp_checkin".into(),
            check_certificate: false,
            mac_interface: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    /// Defaults to `<directory url>/isp/mac_onboarding`.
    pub url: Option<String>,
    pub token_value: Option<String>,
    pub token_env: Option<String>,
    /// Defaults to the top-level `sector_code`.
    pub sector_code: Option<String>,
    pub clear_lease_script_on_disable: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            token_value: None,
            token_env: None,
            sector_code: None,
            clear_lease_script_on_disable: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub identity_prefix: String,
    /// Placeholders: `{prefix}`, `{sector}`, `{ip_last_octet}`.
    pub identity_format: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            identity_prefix: "MT-".into(),
            identity_format: "{prefix}{sector}-{ip_last_octet}".into(),
        }
    }
}

/// Back-office directory (Odoo JSON-RPC) settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub url: String,
    pub db: String,
    pub user: String,
    pub pass_env: Option<String>,
    pub pass_value: Option<String>,
    pub register_device: bool,
    pub fetch_preconfig: bool,
    /// PEM file with the CA that signed the back office certificate.
    #[serde(deserialize_with = "optional_text")]
    pub ca_cert: Option<String>,
    pub insecure_tls: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            db: String::new(),
            user: String::new(),
            pass_env: Some("ODOO_PASS".into()),
            pass_value: None,
            register_device: true,
            fetch_preconfig: false,
            ca_cert: None,
            insecure_tls: false,
        }
    }
}

// ── Behaviour ───────────────────────────────────────────────────────

impl OnboardingConfig {
    /// Deserialize a merged onboarding document.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        serde_json::from_value(value).map_err(|e| CoreError::config(format!("invalid onboarding config: {e}")))
    }

    /// Check the fields every run needs.
    pub fn validate(&self) -> Result<(), CoreError> {
        if non_empty(Some(&self.mgmt_subnet)).is_none() {
            return Err(CoreError::config("mgmt_subnet is required"));
        }
        if non_empty(Some(&self.sector_code)).is_none() {
            return Err(CoreError::config("sector_code is required"));
        }
        if non_empty(Some(&self.routeros.mgmt_user)).is_none() {
            return Err(CoreError::config("routeros.mgmt_user is required"));
        }
        if self.call_home.enabled && non_empty(self.call_home.url.as_deref()).is_none() {
            return Err(CoreError::config("call_home.url is required when call_home.enabled"));
        }
        if self.webhook.enabled && self.webhook_url().is_none() {
            return Err(CoreError::config(
                "webhook.url (or odoo.url) is required when webhook.enabled",
            ));
        }
        Ok(())
    }

    /// Device identity for the device at `ip`.
    pub fn identity_for(&self, ip: Ipv4Addr) -> String {
        let last_octet = ip.octets()[3].to_string();
        self.naming
            .identity_format
            .replace("{prefix}", &self.naming.identity_prefix)
            .replace("{sector}", &self.sector_code)
            .replace("{ip_last_octet}", &last_octet)
    }

    /// MAC-onboarding endpoint the lease script calls.
    pub fn webhook_url(&self) -> Option<String> {
        if let Some(url) = non_empty(self.webhook.url.as_deref()) {
            return Some(url.to_owned());
        }
        let base = self.directory.as_ref().map(|d| d.url.as_str())?;
        non_empty(Some(base)).map(|b| format!("{}/isp/mac_onboarding", b.trim_end_matches('/')))
    }

    pub fn webhook_sector(&self) -> &str {
        non_empty(self.webhook.sector_code.as_deref()).unwrap_or(&self.sector_code)
    }

    /// Resolve every secret the run needs. `lookup` reads a named secret
    /// (environment variable, keyring entry, ...). Empty values count as
    /// unset.
    pub fn resolve_secrets(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<OnboardingSecrets, CoreError> {
        let bootstrap_password = match (non_empty(self.bootstrap.pass.as_deref()), non_empty(self.bootstrap.pass_env.as_deref())) {
            (Some(value), _) => value.to_owned(),
            (None, Some(env)) => required(lookup, env, "bootstrap.pass_env")?,
            // Factory default: empty admin password.
            (None, None) => String::new(),
        };

        let mgmt_password = optional(
            lookup,
            self.routeros.mgmt_pass_value.as_deref(),
            self.routeros.mgmt_pass_env.as_deref(),
        )
        .ok_or_else(|| {
            CoreError::config(format!(
                "management password missing: set routeros.mgmt_pass_value or {}",
                self.routeros.mgmt_pass_env.as_deref().unwrap_or("routeros.mgmt_pass_env")
            ))
        })?;

        let webhook_token = if self.webhook.enabled {
            Some(
                optional(lookup, self.webhook.token_value.as_deref(), self.webhook.token_env.as_deref())
                    .ok_or_else(|| CoreError::config("webhook token missing: set webhook.token_value or webhook.token_env"))?,
            )
        } else {
            None
        };

        let call_home_token = optional(
            lookup,
            self.call_home.token_value.as_deref(),
            self.call_home.token_env.as_deref(),
        );

        let directory_password = match &self.directory {
            Some(dir) if dir.register_device || dir.fetch_preconfig => Some(
                optional(lookup, dir.pass_value.as_deref(), dir.pass_env.as_deref()).ok_or_else(|| {
                    CoreError::config(format!(
                        "directory password missing: set odoo.pass_value or {}",
                        dir.pass_env.as_deref().unwrap_or("odoo.pass_env")
                    ))
                })?,
            ),
            _ => None,
        };

        Ok(OnboardingSecrets {
            bootstrap_password: SecretString::from(bootstrap_password),
            mgmt_password: SecretString::from(mgmt_password),
            webhook_token: webhook_token.map(SecretString::from),
            call_home_token: call_home_token.map(SecretString::from),
            directory_password: directory_password.map(SecretString::from),
        })
    }
}

/// Secrets resolved for one onboarding run.
#[derive(Debug, Clone)]
pub struct OnboardingSecrets {
    pub bootstrap_password: SecretString,
    pub mgmt_password: SecretString,
    pub webhook_token: Option<SecretString>,
    pub call_home_token: Option<SecretString>,
    pub directory_password: Option<SecretString>,
}

fn optional(lookup: &dyn Fn(&str) -> Option<String>, value: Option<&str>, env: Option<&str>) -> Option<String> {
    if let Some(value) = non_empty(value) {
        return Some(value.to_owned());
    }
    let env = non_empty(env)?;
    lookup(env).filter(|v| !v.is_empty())
}

fn required(lookup: &dyn Fn(&str) -> Option<String>, env: &str, field: &str) -> Result<String, CoreError> {
    lookup(env)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::config(format!("secret {env} (from {field}) is not set")))
}

// ── Lenient field readers ───────────────────────────────────────────

/// Text, `null`, or `false` (unset).
fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Text {
        Some(String),
        Flag(bool),
    }

    match Option::<Text>::deserialize(deserializer)? {
        Some(Text::Some(value)) => Ok(Some(value)),
        Some(Text::Flag(false)) | None => Ok(None),
        Some(Text::Flag(true)) => Err(de::Error::invalid_type(de::Unexpected::Bool(true), &"a string")),
    }
}

/// Accept `"a,b"`, `["a", "b"]`, or `null` for interface and address lists.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a comma-separated string or a list of strings")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
            if v {
                Err(E::invalid_type(de::Unexpected::Bool(v), &self))
            } else {
                Ok(Vec::new())
            }
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(parse_list(v))
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                let item = item.trim();
                if !item.is_empty() {
                    out.push(item.to_owned());
                }
            }
            Ok(out)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}
