//! Configuration for the edgeprov binary.
//!
//! TOML app config (defaults, dispatcher, webhook, device table), YAML
//! onboarding documents, and credential resolution (env + keyring +
//! plaintext). The binary layers its global flags on top.

pub mod onboarding;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use edgeprov_api::{ConnectionInfo, DEFAULT_API_PORT};
use edgeprov_core::{DeviceEntry, MacOnboardingSettings, StaticDeviceDirectory};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use onboarding::{directory_client, load_onboarding_document, resolve_onboarding_secrets};

const KEYRING_SERVICE: &str = "edgeprov";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for {what}")]
    NoCredentials { what: String },

    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error(transparent)]
    Core(#[from] edgeprov_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    #[serde(default)]
    pub webhook: WebhookSettings,

    /// Devices jobs can target, by name.
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceProfile>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Device I/O timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Discovery probe timeout in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_probe_timeout_ms() -> u64 {
    500
}

impl Defaults {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DispatcherSettings {
    /// Jobs picked per `jobs run`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,

    /// Log device commands instead of sending them.
    #[serde(default)]
    pub dry_run: bool,

    /// Job queue file; the platform data dir when unset.
    pub jobs_file: Option<PathBuf>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            default_max_attempts: default_max_attempts(),
            dry_run: false,
            jobs_file: None,
        }
    }
}

fn default_batch_size() -> usize {
    20
}
fn default_max_attempts() -> u32 {
    edgeprov_core::DEFAULT_MAX_ATTEMPTS
}

/// MAC onboarding webhook.
#[derive(Debug, Deserialize, Serialize)]
pub struct WebhookSettings {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Shared token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable holding the token.
    pub token_env: Option<String>,

    #[serde(default)]
    pub auto_create: bool,

    pub default_plan: Option<String>,

    #[serde(default)]
    pub auto_create_captive_user: bool,

    #[serde(default = "default_captive_profile")]
    pub captive_profile: String,

    #[serde(default)]
    pub auto_provision_captive: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
            token_env: None,
            auto_create: false,
            default_plan: None,
            auto_create_captive_user: false,
            captive_profile: default_captive_profile(),
            auto_provision_captive: false,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
fn default_captive_profile() -> String {
    "default".into()
}

/// A device jobs can target.
#[derive(Debug, Deserialize, Serialize)]
pub struct DeviceProfile {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    /// Password (plaintext; prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    /// Sector this device serves.
    pub sector: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_API_PORT
}
fn default_username() -> String {
    "odoo_noc".into()
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "edgeprov", "edgeprov")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("edgeprov");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Job queue file: `dispatcher.jobs_file`, else `jobs.json` in the data dir.
pub fn jobs_path(cfg: &Config) -> PathBuf {
    if let Some(path) = &cfg.dispatcher.jobs_file {
        return path.clone();
    }
    project_dirs().map_or_else(
        || dirs_fallback().join("jobs.json"),
        |dirs| dirs.data_dir().join("jobs.json"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from `path` + environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("EDGEPROV_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve a secret: named env var, then keyring entry `key`, then the
/// plaintext value. Empty values count as unset.
pub fn resolve_secret(env_name: Option<&str>, key: &str, plaintext: Option<&str>) -> Option<SecretString> {
    // 1. Env var
    if let Some(value) = env_name.and_then(|name| std::env::var(name).ok()) {
        if !value.is_empty() {
            return Some(SecretString::from(value));
        }
    }

    // 2. System keyring
    if let Some(value) = keyring_get(key) {
        return Some(SecretString::from(value));
    }

    // 3. Plaintext in config
    plaintext
        .filter(|v| !v.is_empty())
        .map(|v| SecretString::from(v.to_owned()))
}

fn keyring_get(key: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, key)
        .ok()?
        .get_password()
        .ok()
        .filter(|v| !v.is_empty())
}

/// Store a secret in the system keyring under `key`.
pub fn store_secret(key: &str, value: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, key)
        .and_then(|entry| entry.set_password(value))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Keyring key of a device password.
pub fn device_key(name: &str) -> String {
    format!("device/{name}")
}

pub const WEBHOOK_TOKEN_KEY: &str = "webhook/token";

pub fn resolve_device_password(profile: &DeviceProfile, name: &str) -> Result<SecretString, ConfigError> {
    resolve_secret(
        profile.password_env.as_deref(),
        &device_key(name),
        profile.password.as_deref(),
    )
    .ok_or_else(|| ConfigError::NoCredentials {
        what: format!("device '{name}'"),
    })
}

// ── Translation to core types ───────────────────────────────────────

/// Build the dispatcher's device table, resolving every password.
pub fn device_directory(cfg: &Config) -> Result<StaticDeviceDirectory, ConfigError> {
    let mut directory = StaticDeviceDirectory::new();
    for (name, profile) in &cfg.devices {
        if profile.host.trim().is_empty() {
            return Err(ConfigError::Validation {
                field: format!("devices.{name}.host"),
                reason: "must not be empty".into(),
            });
        }
        let password = resolve_device_password(profile, name)?;
        directory.insert(
            name.clone(),
            DeviceEntry {
                info: ConnectionInfo::new(&profile.host, profile.port, &profile.username, password),
                sector: profile.sector.clone(),
            },
        );
    }
    Ok(directory)
}

/// Webhook behaviour with the token resolved.
pub fn mac_onboarding_settings(cfg: &Config) -> MacOnboardingSettings {
    let hook = &cfg.webhook;
    MacOnboardingSettings {
        token: resolve_secret(hook.token_env.as_deref(), WEBHOOK_TOKEN_KEY, hook.token.as_deref()),
        auto_create: hook.auto_create,
        default_plan: hook.default_plan.clone(),
        auto_create_captive_user: hook.auto_create_captive_user,
        captive_profile: hook.captive_profile.clone(),
        auto_provision_captive: hook.auto_provision_captive,
    }
}
